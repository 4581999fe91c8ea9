use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_EVENT_BYTES;
use crate::model::Event;

/// Every log file starts with this. Bump the last byte when `Event` changes shape.
const MAGIC: [u8; 8] = *b"RLEDGER\x01";

/// Bytes of framing around each payload: length prefix plus checksum.
const FRAME_OVERHEAD: u64 = 8;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_EVENT_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "event too large"));
    }
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read one framed entry and its size on disk. `Ok(None)` on a clean end,
/// a torn tail, an impossible length, or a bad checksum.
fn decode_event(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_EVENT_BYTES {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    for buf in [&mut payload[..], &mut crc_buf[..]] {
        match reader.read_exact(buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
    }

    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, len as u64 + FRAME_OVERHEAD)))
}

/// Every intact event plus the byte length of the intact prefix.
fn read_log(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    // A crash while creating the file can leave part of the header behind.
    if file_len < MAGIC.len() as u64 {
        let mut partial = Vec::new();
        reader.read_to_end(&mut partial)?;
        if MAGIC.starts_with(&partial) {
            return Ok((Vec::new(), 0));
        }
        return Err(not_a_ledger(path));
    }

    let mut header = [0u8; MAGIC.len()];
    reader.read_exact(&mut header)?;
    if header != MAGIC {
        return Err(not_a_ledger(path));
    }

    let mut events = Vec::new();
    let mut valid_len = MAGIC.len() as u64;
    while let Some((event, frame_len)) = decode_event(&mut reader)? {
        events.push(event);
        valid_len += frame_len;
    }
    Ok((events, valid_len))
}

fn not_a_ledger(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{} is not a roomledger log", path.display()),
    )
}

/// Append-only ledger log.
///
/// Layout: an 8-byte magic header, then entries of `[u32: len][bincode: Event][u32: crc32]`.
/// A torn or corrupt tail (crash mid-write) ends replay at the last good entry;
/// `recover` cuts it off so later appends are readable again.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// End of the last batch that made it to disk intact.
    committed_len: u64,
    /// Set when a failed batch could not be rolled back; every later append fails.
    broken: bool,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path`, writing the header into a fresh file.
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() == 0 {
            file.write_all(&MAGIC)?;
            file.sync_all()?;
        }
        let committed_len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            committed_len,
            broken: false,
            appends_since_compact: 0,
        })
    }

    /// Replay, then truncate anything after the last intact entry.
    /// Call before `open` whenever the log may have been left by a crash.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, valid_len) = read_log(path)?;
        let file = match OpenOptions::new().write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(events),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            tracing::warn!(
                "{}: discarding {} bytes of torn or corrupt tail after {} events",
                path.display(),
                file_len - valid_len,
                events.len()
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(events)
    }

    /// Frame `events` into one buffer. Fails without touching the log.
    pub fn encode_frames(events: &[Event]) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        for event in events {
            encode_event(&mut buf, event)?;
        }
        Ok(buf)
    }

    /// Write pre-encoded frames holding `count` events and fsync.
    ///
    /// On failure the file is cut back to where it was before the call, so a
    /// batch that was reported as failed never shows up on replay.
    pub fn append_frames(&mut self, frames: &[u8], count: u64) -> io::Result<()> {
        if self.broken {
            return Err(io::Error::other("log left inconsistent by an earlier failure; restart to recover"));
        }
        let written = self.file.write_all(frames).and_then(|()| self.file.sync_all());
        match written {
            Ok(()) => {
                self.committed_len += frames.len() as u64;
                self.appends_since_compact += count;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    tracing::error!("WAL rollback failed: {rollback}");
                    self.broken = true;
                }
                Err(e)
            }
        }
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        let frames = Self::encode_frames(std::slice::from_ref(event))?;
        self.append_frames(&frames, 1)
    }

    fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(self.committed_len)?;
        file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write a snapshot log next to `path`. Slow; the writer task calls it
    /// between batches, never while a caller waits on a flush.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        writer.write_all(&MAGIC)?;
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = self.file.metadata()?.len();
        self.broken = false;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// A log whose appends always fail: the handle is read-only.
    #[cfg(test)]
    pub(crate) fn read_only(path: &Path) -> io::Result<Self> {
        let mut wal = Self::open(path)?;
        wal.file = File::open(path)?;
        Ok(wal)
    }

    /// Read back every intact event without modifying the file. A missing or
    /// empty file is an empty log; a file with a foreign header is an error
    /// rather than silently ignored.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        read_log(path).map(|(events, _)| events)
    }
}
