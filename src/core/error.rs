// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 psemu contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for the emulator
//!
//! Only host-level failures travel through these types: missing or
//! malformed input files, lost threads, presentation failures. Guest
//! faults (overflow, address errors, bus errors, ...) are handled by the
//! CPU's exception mechanism and never surface as `Err`.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EmulatorError>;

/// Top-level emulator error
#[derive(Debug, Error)]
pub enum EmulatorError {
    /// BIOS file could not be found/opened
    #[error("BIOS file not found: {0}")]
    BiosNotFound(String),

    /// BIOS file has the wrong size (must be exactly 512 KiB)
    #[error("invalid BIOS size: expected {expected} bytes, got {got}")]
    InvalidBiosSize { expected: usize, got: usize },

    /// CD-ROM subsystem error (cue/bin loading)
    #[error("CD-ROM error: {0}")]
    CdRom(#[from] CdRomError),

    /// The render thread is gone (channel closed)
    #[error("render thread disconnected")]
    RenderThreadLost,

    /// Frontend setup failure (window, surface, device)
    #[error("frontend error: {0}")]
    Frontend(String),

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// CD image loading errors
#[derive(Debug, Error)]
pub enum CdRomError {
    /// Cue sheet path does not end in `.cue`
    #[error("not a cue file: {0}")]
    NotACueFile(String),

    /// Cue sheet is syntactically broken or missing required directives
    #[error("malformed cue sheet: {0}")]
    MalformedCue(String),

    /// Referenced bin file could not be read
    #[error("failed to read bin file '{path}': {source}")]
    BinUnreadable {
        path: String,
        source: std::io::Error,
    },

    /// Underlying I/O error while reading the cue sheet
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bios_size_error_message() {
        let err = EmulatorError::InvalidBiosSize {
            expected: 524_288,
            got: 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("524288"));
        assert!(msg.contains("1024"));
    }

    #[test]
    fn test_cdrom_error_wraps_into_emulator_error() {
        let err: EmulatorError = CdRomError::NotACueFile("disc.iso".into()).into();
        assert!(matches!(err, EmulatorError::CdRom(_)));
        assert!(err.to_string().contains("disc.iso"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: EmulatorError = io.into();
        assert!(matches!(err, EmulatorError::Io(_)));
    }
}
