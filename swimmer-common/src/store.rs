//! Append-only trajectory file.
//!
//! Layout: 8-byte magic, a little-endian `u64` length followed by the bincode
//! [`StoreHeader`], then one entry per frame: a little-endian `u64` byte length
//! followed by the [`FrameRecord`] encoded with the header's [`FrameEncoding`].
//! The frame count is not stored; read mode scans the length prefixes once and
//! keeps an offset index for random access.

use crate::chunk::FrameRecord;
use crate::error::{Result, TrajectoryError};
use crate::snapshot::Snapshot;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File extension used for trajectory stores.
pub const TRAJECTORY_EXTENSION: &str = "traj";

const MAGIC: &[u8; 8] = b"SWIMTRJ\0";
const SCHEMA_NAME: &str = "swimmer";
const SCHEMA_VERSION: (u32, u32) = (1, 0);
const PREFIX_LEN: u64 = 8;

/// Serialization format of frame records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameEncoding {
    #[default]
    Bincode,
    MessagePack,
}

impl FromStr for FrameEncoding {
    type Err = TrajectoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bincode" | "bin" => Ok(FrameEncoding::Bincode),
            "messagepack" | "msgpack" => Ok(FrameEncoding::MessagePack),
            other => Err(TrajectoryError::Config(format!(
                "unknown frame encoding '{}' (expected bincode or messagepack)",
                other
            ))),
        }
    }
}

impl FrameEncoding {
    fn encode(self, record: &FrameRecord) -> Result<Vec<u8>> {
        match self {
            FrameEncoding::Bincode => {
                bincode::serialize(record).map_err(|e| TrajectoryError::Encode(e.to_string()))
            }
            FrameEncoding::MessagePack => {
                rmp_serde::to_vec(record).map_err(|e| TrajectoryError::Encode(e.to_string()))
            }
        }
    }

    fn decode(self, frame: usize, bytes: &[u8]) -> Result<FrameRecord> {
        let decoded = match self {
            FrameEncoding::Bincode => bincode::deserialize(bytes).map_err(|e| e.to_string()),
            FrameEncoding::MessagePack => rmp_serde::from_slice(bytes).map_err(|e| e.to_string()),
        };
        decoded.map_err(|message| TrajectoryError::Decode { frame, message })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreHeader {
    schema: String,
    version: (u32, u32),
    encoding: FrameEncoding,
}

/// How a store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Truncate or create an empty store for sequential appends.
    Create,
    /// Open an existing store for indexed reads.
    Read,
    /// Open an existing store to append further frames.
    Append,
}

impl OpenMode {
    fn name(self) -> &'static str {
        match self {
            OpenMode::Create => "create",
            OpenMode::Read => "read",
            OpenMode::Append => "append",
        }
    }
}

/// An ordered sequence of snapshots persisted to a single file.
///
/// A store owns its file handle for its whole lifetime. A store being written
/// must not be read concurrently by another process until it is dropped or
/// [`close`](TrajectoryStore::close)d.
pub struct TrajectoryStore {
    path: PathBuf,
    mode: OpenMode,
    encoding: FrameEncoding,
    reader: Option<BufReader<File>>,
    writer: Option<BufWriter<File>>,
    /// File offset of each frame's length prefix.
    offsets: Vec<u64>,
    /// Offset at which the next frame is written.
    end: u64,
    /// Frame 0 record, source of chunks later frames omit.
    header_frame: Option<FrameRecord>,
}

impl TrajectoryStore {
    /// Opens `path` in `mode`. `Create` uses the default frame encoding.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        match mode {
            OpenMode::Create => Self::create(path, FrameEncoding::default()),
            OpenMode::Read | OpenMode::Append => Self::open_existing(path.as_ref(), mode),
        }
    }

    /// Creates (or truncates) an empty store at `path`.
    pub fn create<P: AsRef<Path>>(path: P, encoding: FrameEncoding) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| TrajectoryError::io(&path, e))?;
        let mut writer = BufWriter::new(file);

        let header = StoreHeader {
            schema: SCHEMA_NAME.to_string(),
            version: SCHEMA_VERSION,
            encoding,
        };
        let header_bytes =
            bincode::serialize(&header).map_err(|e| TrajectoryError::Encode(e.to_string()))?;
        writer
            .write_all(MAGIC)
            .map_err(|e| TrajectoryError::io(&path, e))?;
        write_entry(&mut writer, &header_bytes).map_err(|e| TrajectoryError::io(&path, e))?;

        info!("Created trajectory store {} ({:?} frames)", path.display(), encoding);
        Ok(TrajectoryStore {
            end: MAGIC.len() as u64 + PREFIX_LEN + header_bytes.len() as u64,
            path,
            mode: OpenMode::Create,
            encoding,
            reader: None,
            writer: Some(writer),
            offsets: Vec::new(),
            header_frame: None,
        })
    }

    fn open_existing(path: &Path, mode: OpenMode) -> Result<Self> {
        let path = path.to_path_buf();
        let file = File::open(&path).map_err(|e| TrajectoryError::io(&path, e))?;
        let file_len = file
            .metadata()
            .map_err(|e| TrajectoryError::io(&path, e))?
            .len();
        let mut reader = BufReader::new(file);

        let header = read_header(&path, &mut reader, file_len)?;
        let (offsets, end) = scan_frames(&path, &mut reader, file_len)?;

        let writer = if mode == OpenMode::Append {
            let file = OpenOptions::new()
                .append(true)
                .open(&path)
                .map_err(|e| TrajectoryError::io(&path, e))?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        info!(
            "Opened trajectory store {} in {} mode: {} frames",
            path.display(),
            mode.name(),
            offsets.len()
        );
        Ok(TrajectoryStore {
            path,
            mode,
            encoding: header.encoding,
            reader: Some(reader),
            writer,
            offsets,
            end,
            header_frame: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn encoding(&self) -> FrameEncoding {
        self.encoding
    }

    pub fn frame_count(&self) -> usize {
        self.offsets.len()
    }

    /// Appends `snapshot` as the next frame and returns its index.
    ///
    /// The snapshot must be internally consistent and its `step` must equal the
    /// current frame count, so that frame `i` always carries step `i`.
    pub fn append(&mut self, snapshot: &Snapshot) -> Result<usize> {
        let mode = self.mode;
        let writer = self.writer.as_mut().ok_or(TrajectoryError::WrongMode {
            operation: "append",
            mode: mode.name(),
        })?;
        snapshot.validate()?;
        let index = self.offsets.len();
        if snapshot.configuration.step != index as u64 {
            return Err(TrajectoryError::precondition(format!(
                "frame {} carries step {}; steps must increase by one from zero",
                index, snapshot.configuration.step
            )));
        }

        let record = FrameRecord::from_snapshot(snapshot);
        let bytes = self.encoding.encode(&record)?;
        write_entry(writer, &bytes).map_err(|e| TrajectoryError::io(&self.path, e))?;

        self.offsets.push(self.end);
        self.end += PREFIX_LEN + bytes.len() as u64;
        if index == 0 {
            self.header_frame = Some(record);
        }
        debug!("Appended frame {} ({} bytes) to {}", index, bytes.len(), self.path.display());
        Ok(index)
    }

    /// Reads frame `index`, `0 <= index < frame_count`.
    pub fn read_frame(&mut self, index: usize) -> Result<Snapshot> {
        let frame_count = self.frame_count();
        if index >= frame_count {
            return Err(TrajectoryError::OutOfBounds { index, frame_count });
        }
        if self.reader.is_none() {
            return Err(TrajectoryError::WrongMode {
                operation: "read_frame",
                mode: self.mode.name(),
            });
        }
        let record = self.read_record(index)?;
        if index == 0 {
            return Snapshot::from_record(0, &record, None);
        }
        if self.header_frame.is_none() {
            self.header_frame = Some(self.read_record(0)?);
        }
        Snapshot::from_record(index, &record, self.header_frame.as_ref())
    }

    /// Reads the final frame, or `None` for an empty store.
    pub fn last_frame(&mut self) -> Result<Option<Snapshot>> {
        match self.frame_count() {
            0 => Ok(None),
            n => self.read_frame(n - 1).map(Some),
        }
    }

    fn read_record(&mut self, index: usize) -> Result<FrameRecord> {
        let offset = self.offsets[index];
        let path = &self.path;
        let reader = self.reader.as_mut().ok_or(TrajectoryError::WrongMode {
            operation: "read_frame",
            mode: self.mode.name(),
        })?;
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| TrajectoryError::io(path, e))?;
        let len = read_u64(reader).map_err(|e| TrajectoryError::io(path, e))?;
        let mut bytes = vec![0u8; len as usize];
        reader
            .read_exact(&mut bytes)
            .map_err(|e| TrajectoryError::io(path, e))?;
        self.encoding.decode(index, &bytes)
    }

    /// Flushes pending writes and releases the file handle.
    pub fn close(mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().map_err(|e| TrajectoryError::io(&self.path, e))?;
        }
        debug!("Closed trajectory store {}", self.path.display());
        Ok(())
    }
}

/// Writes a length-prefixed entry and flushes it to disk.
fn write_entry<W: Write>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(&(bytes.len() as u64).to_le_bytes())?;
    writer.write_all(bytes)?;
    writer.flush()
}

fn read_u64<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_header<R: Read>(path: &Path, reader: &mut R, file_len: u64) -> Result<StoreHeader> {
    let mut magic = [0u8; 8];
    reader
        .read_exact(&mut magic)
        .map_err(|_| TrajectoryError::format(path, "file too short for a trajectory header"))?;
    if &magic != MAGIC {
        return Err(TrajectoryError::format(path, "not a trajectory store (bad magic)"));
    }
    let len = read_u64(reader)
        .map_err(|_| TrajectoryError::format(path, "truncated trajectory header"))?;
    let available = file_len.saturating_sub(MAGIC.len() as u64 + PREFIX_LEN);
    if len > available {
        return Err(TrajectoryError::format(
            path,
            format!("header length {} exceeds the {} bytes that follow it", len, available),
        ));
    }
    let mut bytes = vec![0u8; len as usize];
    reader
        .read_exact(&mut bytes)
        .map_err(|_| TrajectoryError::format(path, "truncated trajectory header"))?;
    let header: StoreHeader = bincode::deserialize(&bytes)
        .map_err(|e| TrajectoryError::format(path, format!("unreadable header: {}", e)))?;
    if header.schema != SCHEMA_NAME {
        return Err(TrajectoryError::format(
            path,
            format!("schema '{}' is not '{}'", header.schema, SCHEMA_NAME),
        ));
    }
    if header.version.0 != SCHEMA_VERSION.0 {
        return Err(TrajectoryError::format(
            path,
            format!(
                "schema version {}.{} unsupported (expected {}.x)",
                header.version.0, header.version.1, SCHEMA_VERSION.0
            ),
        ));
    }
    Ok(header)
}

/// Walks the frame length prefixes and returns the frame offsets and the end offset.
fn scan_frames<R: Read + Seek>(
    path: &Path,
    reader: &mut R,
    file_len: u64,
) -> Result<(Vec<u64>, u64)> {
    let mut offsets = Vec::new();
    let mut pos = reader
        .stream_position()
        .map_err(|e| TrajectoryError::io(path, e))?;
    while pos < file_len {
        if pos + PREFIX_LEN > file_len {
            return Err(TrajectoryError::format(
                path,
                format!("truncated length prefix for frame {}", offsets.len()),
            ));
        }
        let len = read_u64(reader).map_err(|e| TrajectoryError::io(path, e))?;
        let next = match pos.checked_add(PREFIX_LEN).and_then(|p| p.checked_add(len)) {
            Some(next) if next <= file_len => next,
            _ => {
                return Err(TrajectoryError::format(
                    path,
                    format!("frame {} is truncated", offsets.len()),
                ))
            }
        };
        offsets.push(pos);
        reader
            .seek(SeekFrom::Start(next))
            .map_err(|e| TrajectoryError::io(path, e))?;
        pos = next;
    }
    Ok((offsets, pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{DualPrecision, Particles, DEFAULT_DIAMETER};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "swimmer_store_{}_{}.{}",
            name,
            std::process::id(),
            TRAJECTORY_EXTENSION
        ))
    }

    fn frame(step: u64) -> Snapshot {
        let pos = vec![[0.0, 0.0, 2.1], [3.5, 0.0, 2.1], [-3.5, 0.0, 2.1]];
        let mut s = Snapshot {
            particles: Particles {
                n: 3,
                types: vec!["constrained".into(), "locater".into()],
                typeid: vec![1, 0, 0],
                diameter: vec![DEFAULT_DIAMETER; 3],
                orientation: None,
                position: DualPrecision::from_archival(pos.clone()),
                velocity: DualPrecision::from_archival(vec![[1.0, 0.0, 0.0]; 3]),
                acceleration: DualPrecision::from_archival(vec![[1.0, 0.0, 0.0]; 3]),
            },
            ..Default::default()
        };
        s.configuration.step = step;
        s
    }

    #[test]
    fn encoding_names_parse() {
        assert_eq!("bincode".parse::<FrameEncoding>().unwrap(), FrameEncoding::Bincode);
        assert_eq!("MsgPack".parse::<FrameEncoding>().unwrap(), FrameEncoding::MessagePack);
        assert!("json".parse::<FrameEncoding>().is_err());
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = TrajectoryStore::open(temp_path("missing_never_created"), OpenMode::Read)
            .err()
            .unwrap();
        assert!(matches!(err, TrajectoryError::NotFound(_)));
    }

    #[test]
    fn foreign_file_is_format_error() {
        let path = temp_path("foreign");
        std::fs::write(&path, b"this is not a trajectory").unwrap();
        let err = TrajectoryStore::open(&path, OpenMode::Read).err().unwrap();
        assert!(matches!(err, TrajectoryError::Format { .. }));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn truncated_frame_is_format_error() {
        let path = temp_path("truncated");
        let mut store = TrajectoryStore::create(&path, FrameEncoding::Bincode).unwrap();
        store.append(&frame(0)).unwrap();
        store.close().unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let err = TrajectoryStore::open(&path, OpenMode::Read).err().unwrap();
        assert!(matches!(err, TrajectoryError::Format { .. }));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn oversized_header_length_is_format_error() {
        let path = temp_path("header_len");
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        bytes.extend_from_slice(b"swimmer");
        std::fs::write(&path, &bytes).unwrap();

        let err = TrajectoryStore::open(&path, OpenMode::Read).err().unwrap();
        assert!(matches!(err, TrajectoryError::Format { .. }));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn overflowing_frame_length_is_format_error() {
        let path = temp_path("frame_len");
        let mut store = TrajectoryStore::create(&path, FrameEncoding::Bincode).unwrap();
        store.append(&frame(0)).unwrap();
        store.close().unwrap();

        // a prefix that wraps the offset back onto itself
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&(u64::MAX - 7).to_le_bytes()).unwrap();
        drop(file);

        let err = TrajectoryStore::open(&path, OpenMode::Read).err().unwrap();
        assert!(matches!(err, TrajectoryError::Format { .. }));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn append_rejects_step_gap() {
        let path = temp_path("step_gap");
        let mut store = TrajectoryStore::create(&path, FrameEncoding::Bincode).unwrap();
        let err = store.append(&frame(1)).unwrap_err();
        assert!(matches!(err, TrajectoryError::Precondition(_)));
        assert_eq!(store.frame_count(), 0);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn read_is_rejected_in_create_mode() {
        let path = temp_path("create_read");
        let mut store = TrajectoryStore::create(&path, FrameEncoding::Bincode).unwrap();
        store.append(&frame(0)).unwrap();
        let err = store.read_frame(0).unwrap_err();
        assert!(matches!(err, TrajectoryError::WrongMode { .. }));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn append_is_rejected_in_read_mode() {
        let path = temp_path("read_append");
        TrajectoryStore::create(&path, FrameEncoding::Bincode)
            .unwrap()
            .close()
            .unwrap();
        let mut store = TrajectoryStore::open(&path, OpenMode::Read).unwrap();
        let err = store.append(&frame(0)).unwrap_err();
        assert!(matches!(err, TrajectoryError::WrongMode { .. }));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn empty_store_has_no_frame_zero() {
        let path = temp_path("empty");
        TrajectoryStore::create(&path, FrameEncoding::Bincode)
            .unwrap()
            .close()
            .unwrap();
        let mut store = TrajectoryStore::open(&path, OpenMode::Read).unwrap();
        assert_eq!(store.frame_count(), 0);
        let err = store.read_frame(0).unwrap_err();
        assert!(matches!(
            err,
            TrajectoryError::OutOfBounds { index: 0, frame_count: 0 }
        ));
        assert!(store.last_frame().unwrap().is_none());
        std::fs::remove_file(&path).ok();
    }
}
