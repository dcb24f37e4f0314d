//! Admission policy: decides whether a submitted file may enter the queue.

use regex::RegexSet;

use crate::config::QueueConfig;
use crate::error::{FileError, QueueError};

/// Queue occupancy as seen by the item being checked: what is already
/// queued plus what was accepted earlier in the same batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Occupancy {
    pub files: usize,
    pub bytes: u64,
}

/// Compiled admission rules.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    accepted_types: Option<RegexSet>,
    maximum_file_size: u64,
    byte_budget: Option<u64>,
    maximum_queue_size: usize,
    silence_zero_byte_errors: bool,
}

impl AdmissionPolicy {
    /// Compiles the policy from configuration.
    pub fn from_config(config: &QueueConfig) -> Result<Self, QueueError> {
        let accepted_types = if config.accepted_mime_types.is_empty() {
            None
        } else {
            Some(RegexSet::new(&config.accepted_mime_types)?)
        };

        Ok(Self {
            accepted_types,
            maximum_file_size: config.maximum_file_size,
            byte_budget: config.byte_budget(),
            maximum_queue_size: config.maximum_queue_size,
            silence_zero_byte_errors: config.silence_zero_byte_errors,
        })
    }

    /// Returns `true` if `mime_type` matches an accepted pattern, or if
    /// every type is accepted.
    pub fn accepts_type(&self, mime_type: &str) -> bool {
        self.accepted_types
            .as_ref()
            .is_none_or(|set| set.is_match(mime_type))
    }

    /// Checks one file. Rules run in a fixed order and the first failure
    /// is the only one reported:
    /// zero bytes, MIME type, file size, byte budget, queue length.
    pub fn check(&self, size: u64, mime_type: &str, occupancy: Occupancy) -> Result<(), FileError> {
        if size == 0 && !self.silence_zero_byte_errors {
            return Err(FileError::ZeroByteFile);
        }

        if !self.accepts_type(mime_type) {
            return Err(FileError::UnacceptedMimeType);
        }

        if size >= self.maximum_file_size {
            return Err(FileError::FileTooLarge);
        }

        if let Some(budget) = self.byte_budget {
            if occupancy.bytes.saturating_add(size) > budget {
                return Err(FileError::QueueFull);
            }
        }

        if occupancy.files >= self.maximum_queue_size {
            return Err(FileError::QueueFull);
        }

        Ok(())
    }
}
