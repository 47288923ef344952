use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;

use crate::act::ActCell;
use crate::cell::RecurrentCell;
use crate::config::ActConfig;
use crate::errors::{ActError, Result};
use crate::halting::HaltingUnit;

/// Current checkpoint format version
/// Increment this when making breaking changes to the serialization format
const CHECKPOINT_VERSION: u32 = 1;

/// Everything ACT owns that survives across training runs.
///
/// The wrapped cell is not part of the checkpoint; it is persisted by whoever
/// owns its parameters.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ActCheckpoint {
    pub config: ActConfig,
    pub halting_unit: HaltingUnit,
}

/// Versioned checkpoint container with integrity checking
#[derive(Serialize, Deserialize, Clone)]
pub struct VersionedCheckpoint {
    /// Format version for backward compatibility
    pub version: u32,
    /// SHA256 checksum of the serialized payload (hex string)
    pub checksum: String,
    /// Serialized [`ActCheckpoint`] (JSON or binary)
    pub data: Vec<u8>,
    pub metadata: CheckpointMetadata,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CheckpointMetadata {
    /// Timestamp when the checkpoint was saved (RFC 3339)
    pub saved_at: String,
    /// `cell_type()` of the wrapped cell at save time
    pub cell_type: String,
    pub num_parameters: usize,
    pub num_units: usize,
    pub state_is_tuple: bool,
    pub description: Option<String>,
}

fn checksum_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn format_for_path(path: &str) -> &'static str {
    if path.ends_with(".json") { "json" } else { "binary" }
}

impl VersionedCheckpoint {
    /// # Errors
    /// Returns `ActError::InvalidInput` for an unknown format and
    /// `ActError::Serialization` if encoding fails
    pub fn from_checkpoint(
        checkpoint: &ActCheckpoint,
        cell_type: &str,
        format: &str,
        description: Option<String>,
    ) -> Result<Self> {
        let data = match format {
            "json" => serde_json::to_vec_pretty(checkpoint).map_err(|e| ActError::Serialization {
                source: Box::new(e),
            })?,
            "binary" => {
                let config = bincode::config::standard();
                bincode::serde::encode_to_vec(checkpoint, config).map_err(|e| ActError::Serialization {
                    source: Box::new(e),
                })?
            }
            _ => {
                return Err(ActError::InvalidInput {
                    message: format!("Unsupported format: {}", format),
                });
            }
        };

        let metadata = CheckpointMetadata {
            saved_at: chrono::Utc::now().to_rfc3339(),
            cell_type: cell_type.to_string(),
            num_parameters: checkpoint.halting_unit.parameters(),
            num_units: checkpoint.config.num_units,
            state_is_tuple: checkpoint.config.state_is_tuple,
            description,
        };

        Ok(VersionedCheckpoint {
            version: CHECKPOINT_VERSION,
            checksum: checksum_hex(&data),
            data,
            metadata,
        })
    }

    pub fn validate_checksum(&self) -> Result<()> {
        let computed = checksum_hex(&self.data);
        if computed != self.checksum {
            return Err(ActError::Serialization {
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Checksum mismatch: expected {}, got {}", self.checksum, computed),
                )),
            });
        }
        Ok(())
    }

    pub fn validate_version(&self) -> Result<()> {
        if self.version > CHECKPOINT_VERSION {
            return Err(ActError::Serialization {
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "Checkpoint version {} is newer than supported version {}",
                        self.version, CHECKPOINT_VERSION
                    ),
                )),
            });
        }

        if self.version < CHECKPOINT_VERSION {
            tracing::warn!(
                "Loading checkpoint with older version {} (current: {})",
                self.version,
                CHECKPOINT_VERSION
            );
        }

        Ok(())
    }

    /// Validate and decode the payload.
    pub fn to_checkpoint(&self, format: &str) -> Result<ActCheckpoint> {
        self.validate_version()?;
        self.validate_checksum()?;

        let checkpoint: ActCheckpoint = match format {
            "json" => serde_json::from_slice(&self.data).map_err(|e| ActError::Serialization {
                source: Box::new(e),
            })?,
            "binary" => {
                let config = bincode::config::standard();
                let (checkpoint, _): (ActCheckpoint, usize) =
                    bincode::serde::decode_from_slice(&self.data, config).map_err(|e| {
                        ActError::Serialization {
                            source: Box::new(e),
                        }
                    })?;
                checkpoint
            }
            _ => {
                return Err(ActError::InvalidInput {
                    message: format!("Unsupported format: {}", format),
                });
            }
        };

        checkpoint.config.validate()?;
        Ok(checkpoint)
    }

    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| ActError::Serialization {
            source: Box::new(e),
        })?;
        fs::write(path, json).map_err(ActError::from)?;
        Ok(())
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(ActError::from)?;
        serde_json::from_str(&data).map_err(|e| ActError::Serialization {
            source: Box::new(e),
        })
    }
}

impl<C: RecurrentCell> ActCell<C> {
    pub fn checkpoint(&self) -> ActCheckpoint {
        ActCheckpoint {
            config: *self.config(),
            halting_unit: self.halting_unit().clone(),
        }
    }

    /// Save the halting unit and config; `.json` paths store a JSON payload,
    /// anything else a binary one.
    pub fn save_versioned(&self, path: &str, description: Option<String>) -> Result<()> {
        let format = format_for_path(path);
        let versioned =
            VersionedCheckpoint::from_checkpoint(&self.checkpoint(), self.cell().cell_type(), format, description)?;
        versioned.save_to_file(path)?;

        tracing::info!(
            path = path,
            version = CHECKPOINT_VERSION,
            checksum = &versioned.checksum[..16],
            cell_type = &versioned.metadata.cell_type,
            "ACT checkpoint saved"
        );

        Ok(())
    }

    /// Restore a checkpoint around `cell`. Carry state and ponder log start empty.
    pub fn load_versioned(path: &str, cell: C) -> Result<Self> {
        let versioned = VersionedCheckpoint::load_from_file(path)?;

        tracing::info!(
            path = path,
            version = versioned.version,
            checksum = &versioned.checksum[..16.min(versioned.checksum.len())],
            saved_at = &versioned.metadata.saved_at,
            "Loading ACT checkpoint"
        );

        let checkpoint = versioned.to_checkpoint(format_for_path(path))?;
        ActCell::with_halting_unit(cell, checkpoint.config, checkpoint.halting_unit)
    }
}
