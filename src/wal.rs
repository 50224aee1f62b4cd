use std::fmt::Debug;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context as _, Result};
use fs_err::{File, OpenOptions};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, info, trace, warn};

use crate::types::NodeRole;

/// WAL file header to identify format and owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalHeader {
    pub magic: [u8; 4],  // "RKVL"
    pub version: u32,    // Format version
    pub role: NodeRole,  // Node that owns this log
    pub created_at: i64, // Timestamp when the file was created
}

impl WalHeader {
    const MAGIC: [u8; 4] = *b"RKVL";
    const VERSION: u32 = 1;

    pub fn new(role: NodeRole) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            role,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == Self::MAGIC && self.version == Self::VERSION
    }
}

/// One framed record in the log file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalFrame<R> {
    pub sequence: u64,
    pub record: R,
    pub checksum: u32,
}

impl<R: Serialize> WalFrame<R> {
    pub fn new(sequence: u64, record: R) -> Result<Self> {
        let checksum = record_checksum(&record)?;
        Ok(Self {
            sequence,
            record,
            checksum,
        })
    }

    pub fn verify_checksum(&self) -> bool {
        record_checksum(&self.record).is_ok_and(|computed| computed == self.checksum)
    }
}

fn record_checksum<R: Serialize>(record: &R) -> Result<u32> {
    let serialized = bincode::serde::encode_to_vec(record, bincode::config::standard())?;
    Ok(crc32fast::hash(&serialized))
}

/// Append-only, checksummed log of `R` records.
///
/// Every append is flushed and fsynced before returning, so a record that
/// was appended successfully survives a crash.
pub struct WriteAheadLog<R> {
    file_path: PathBuf,
    writer: Option<BufWriter<File>>,
    sequence: u64,
    /// Byte length of the header plus every committed frame
    len: u64,
    role: NodeRole,
    _record: PhantomData<fn() -> R>,
}

impl<R> WriteAheadLog<R>
where
    R: Serialize + DeserializeOwned + Debug,
{
    /// Create or open a log file
    pub fn open<P: AsRef<Path>>(file_path: P, role: NodeRole) -> Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();

        let mut wal = Self {
            file_path,
            writer: None,
            sequence: 0,
            len: 0,
            role,
            _record: PhantomData,
        };

        wal.open_for_writing()?;
        Ok(wal)
    }

    fn open_for_writing(&mut self) -> Result<()> {
        let file_exists = self.file_path.exists();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.file_path)?;

        if !file_exists {
            let mut writer = BufWriter::new(file);
            let header = WalHeader::new(self.role);
            let header_bytes =
                bincode::serde::encode_to_vec(&header, bincode::config::standard())?;
            let header_len = header_bytes.len() as u32;

            writer.write_all(&header_len.to_le_bytes())?;
            writer.write_all(&header_bytes)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            self.len = 4 + header_bytes.len() as u64;

            info!("Created new WAL file: {:?}", self.file_path);
            self.writer = Some(writer);
        } else {
            let mut reader = BufReader::new(&file);
            let header = read_header(&mut reader)?;

            if !header.is_valid() {
                return Err(anyhow!("Invalid WAL file header"));
            }
            if header.role != self.role {
                bail!(
                    "WAL role mismatch: expected {}, found {}",
                    self.role,
                    header.role
                );
            }

            let (sequence, valid_len) = self.find_last_sequence(&mut reader)?;
            drop(reader);
            if file.metadata()?.len() > valid_len {
                warn!(
                    "Dropping torn tail of WAL {:?} after byte {valid_len}",
                    self.file_path
                );
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            self.sequence = sequence;
            self.len = valid_len;
            self.writer = Some(BufWriter::new(file));

            info!(
                "Opened existing WAL file: {:?}, last sequence: {}",
                self.file_path, self.sequence
            );
        }

        Ok(())
    }

    /// Last sequence number and the byte length of the complete frames.
    ///
    /// Only a frame cut short by the end of the file is treated as a torn
    /// tail. A complete frame that fails to decode or verify is an error.
    fn find_last_sequence<T: Read + Seek>(&self, reader: &mut T) -> Result<(u64, u64)> {
        let mut last_sequence = 0;

        reader.seek(SeekFrom::Start(0))?;
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let header_len = u32::from_le_bytes(len_bytes) as u64;
        let mut valid_len = reader.seek(SeekFrom::Current(header_len as i64))?;

        loop {
            let bytes = match read_frame_bytes(reader) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(err) => {
                    warn!("Truncated WAL frame: {err}");
                    break;
                }
            };
            let (frame, _) = bincode::serde::decode_from_slice::<WalFrame<R>, _>(
                &bytes,
                bincode::config::standard(),
            )
            .with_context(|| {
                format!(
                    "Failed to deserialize WAL frame after sequence {last_sequence} in {:?}",
                    self.file_path
                )
            })?;
            if !frame.verify_checksum() {
                bail!(
                    "WAL frame {} corrupted in {:?}",
                    frame.sequence,
                    self.file_path
                );
            }
            last_sequence = frame.sequence;
            valid_len += 4 + bytes.len() as u64;
        }

        Ok((last_sequence, valid_len))
    }

    pub fn append(&mut self, record: &R) -> Result<()> {
        self.append_all(std::slice::from_ref(record))
    }

    /// Append several records with a single fsync.
    ///
    /// Either every record is durable or none is: on failure the file is cut
    /// back to its previous length and the sequence is left untouched. If
    /// that rollback fails too, the log refuses further appends.
    pub fn append_all(&mut self, records: &[R]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        if let Err(err) = self.write_frames(records) {
            if let Err(rollback) = self.discard_partial_write() {
                error!(
                    "Failed to roll back WAL {:?}, refusing further appends: {rollback:?}",
                    self.file_path
                );
            }
            return Err(err);
        }
        Ok(())
    }

    fn write_frames(&mut self, records: &[R]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("WAL {:?} is not writable", self.file_path))?;

        let mut sequence = self.sequence;
        let mut written = 0u64;
        for record in records {
            sequence += 1;
            let frame = WalFrame::new(sequence, record)?;
            let frame_bytes = bincode::serde::encode_to_vec(&frame, bincode::config::standard())?;

            writer.write_all(&(frame_bytes.len() as u32).to_le_bytes())?;
            writer.write_all(&frame_bytes)?;
            written += 4 + frame_bytes.len() as u64;

            trace!("Wrote WAL record: sequence={sequence}, record={record:?}");
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;

        self.sequence = sequence;
        self.len += written;
        Ok(())
    }

    /// Drop buffered bytes of a failed batch and cut the file back to the
    /// last committed frame
    fn discard_partial_write(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let (file, _unflushed) = writer.into_parts();
        file.set_len(self.len)?;
        file.sync_all()?;
        self.writer = Some(BufWriter::new(file));
        warn!(
            "Rolled back failed append to WAL {:?} at byte {}",
            self.file_path, self.len
        );
        Ok(())
    }

    /// Read every record for recovery, oldest first
    pub fn read_all(&self) -> Result<Vec<R>> {
        let file = File::open(&self.file_path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        if !header.is_valid() {
            bail!("WAL header is invalid");
        }
        if header.role != self.role {
            bail!(
                "WAL role mismatch: expected {}, found {}",
                self.role,
                header.role
            );
        }

        let mut records = Vec::new();
        loop {
            let bytes = match read_frame_bytes(&mut reader) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(err) => {
                    warn!("Encountered truncated WAL frame ({err}); stopping replay");
                    break;
                }
            };
            let (frame, _) = bincode::serde::decode_from_slice::<WalFrame<R>, _>(
                &bytes,
                bincode::config::standard(),
            )
            .context("Failed to deserialize WAL frame")?;
            if !frame.verify_checksum() {
                bail!("WAL frame {} corrupted", frame.sequence);
            }
            records.push(frame.record);
        }

        info!(
            "Read {} records from WAL: {:?}",
            records.len(),
            self.file_path
        );
        Ok(records)
    }

    /// Sequence number of the last record written
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl<R> Drop for WriteAheadLog<R> {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let result = writer.flush().and_then(|()| writer.get_ref().sync_all());
            if let Err(e) = result {
                error!("Error closing WAL in drop: {e}");
            }
        }
    }
}

fn read_header<T: Read>(reader: &mut T) -> Result<WalHeader> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let header_len = u32::from_le_bytes(len_bytes);

    let mut header_bytes = vec![0u8; header_len as usize];
    reader.read_exact(&mut header_bytes)?;

    let (header, _): (WalHeader, _) =
        bincode::serde::decode_from_slice(&header_bytes, bincode::config::standard())?;
    Ok(header)
}

/// Read one length-prefixed frame. `Ok(None)` at a clean end of file;
/// an error when the file ends inside a frame.
fn read_frame_bytes<T: Read>(reader: &mut T) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err).context("Failed to read WAL frame length"),
    }
    let frame_len = u32::from_le_bytes(len_bytes);

    let mut bytes = vec![0u8; frame_len as usize];
    reader
        .read_exact(&mut bytes)
        .with_context(|| format!("WAL frame truncated (expected {frame_len} bytes)"))?;
    Ok(Some(bytes))
}
