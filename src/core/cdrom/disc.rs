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

//! Cue/bin disc images
//!
//! A cue sheet names exactly one `FILE "..."` (the raw 2352-byte-sector
//! bin stream, resolved relative to the cue's directory) followed by
//! TRACK blocks. PREGAP directives insert disc time that has no backing
//! bytes in the file; each track therefore carries a byte offset that
//! maps disc positions back into the bin.
//!
//! Disc positions are byte-granular: one frame is 2352 bytes, one
//! second 75 frames (176,400 bytes), one minute 60 seconds
//! (10,584,000 bytes).

use std::path::Path;

use crate::core::error::CdRomError;

/// Bytes per frame (sector)
pub const BYTES_PER_FRAME: u64 = 2_352;

/// Bytes per second of disc time (75 frames)
pub const BYTES_PER_SECOND: u64 = 176_400;

/// Bytes per minute of disc time (60 seconds)
pub const BYTES_PER_MINUTE: u64 = 10_584_000;

/// Track data format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    /// CD-DA audio, 2352 bytes per sector
    Audio,
    /// XA data, 2352 bytes per sector
    Mode2_2352,
}

/// One track of the disc
///
/// `start..=end` is the track's span in disc byte positions; `offset`
/// is subtracted from a disc position to index the bin file (it equals
/// the pregap bytes accumulated before this track).
#[derive(Debug, Clone)]
pub struct Track {
    /// Track number from the cue sheet (1-99)
    pub number: u8,

    /// Data format
    pub track_type: TrackType,

    /// First disc byte position of the track
    pub start: u64,

    /// Last disc byte position of the track (inclusive)
    pub end: u64,

    /// Disc-position-to-file-offset correction
    pub offset: u64,
}

/// A loaded cue+bin disc
#[derive(Debug)]
pub struct Disc {
    /// Track index
    tracks: Vec<Track>,

    /// Raw bin file contents
    data: Vec<u8>,
}

impl Disc {
    /// Load a disc from a cue sheet
    ///
    /// # Errors
    ///
    /// Fails when the path does not end in `.cue`/`.CUE`, the cue sheet
    /// is malformed (no FILE line, no tracks, bad timestamps), or the
    /// referenced bin file cannot be read.
    pub fn load(cue_path: &str) -> Result<Self, CdRomError> {
        if !cue_path.ends_with(".cue") && !cue_path.ends_with(".CUE") {
            return Err(CdRomError::NotACueFile(cue_path.to_string()));
        }

        let cue_text = std::fs::read_to_string(cue_path)?;
        let bin_name = Self::file_directive(&cue_text)?;

        // The bin path is relative to the cue sheet's directory
        let bin_path = Path::new(cue_path)
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&bin_name);
        let data = std::fs::read(&bin_path).map_err(|source| CdRomError::BinUnreadable {
            path: bin_path.display().to_string(),
            source,
        })?;

        let tracks = Self::parse_tracks(&cue_text, data.len() as u64)?;

        log::info!(
            "loaded disc: {} track(s), {} MiB",
            tracks.len(),
            data.len() / (1024 * 1024)
        );

        Ok(Self { tracks, data })
    }

    /// Build a disc from raw parts (tests)
    #[cfg(test)]
    pub(crate) fn from_parts(tracks: Vec<Track>, data: Vec<u8>) -> Self {
        Self { tracks, data }
    }

    /// The track table
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Read the byte at a disc position
    ///
    /// Positions outside every track (pregap space, beyond the lead-out)
    /// read as zero.
    pub fn byte_at(&self, position: u64) -> u8 {
        for track in &self.tracks {
            if position >= track.start && position <= track.end {
                let index = (position - track.offset) as usize;
                return self.data.get(index).copied().unwrap_or(0);
            }
        }
        0
    }

    /// Copy a run of bytes starting at a disc position (sector reads)
    pub fn read_chunk(&self, position: u64, out: &mut [u8]) {
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.byte_at(position + i as u64);
        }
    }

    /// Extract the single `FILE "..."` directive
    fn file_directive(cue_text: &str) -> Result<String, CdRomError> {
        for line in cue_text.lines() {
            let line = line.trim_start_matches('\u{feff}').trim();
            if let Some(rest) = line.strip_prefix("FILE") {
                let mut quoted = rest.split('"');
                quoted.next();
                return quoted
                    .next()
                    .map(str::to_string)
                    .ok_or_else(|| CdRomError::MalformedCue("unquoted FILE path".into()));
            }
        }
        Err(CdRomError::MalformedCue("no FILE directive".into()))
    }

    /// Parse `mm:ss:ff` into a disc byte count
    fn timestamp_bytes(stamp: &str) -> Result<u64, CdRomError> {
        let mut parts = stamp.split(':');
        let mut next = || -> Result<u64, CdRomError> {
            parts
                .next()
                .and_then(|p| p.trim().parse::<u64>().ok())
                .ok_or_else(|| CdRomError::MalformedCue(format!("bad timestamp '{}'", stamp)))
        };
        let minutes = next()?;
        let seconds = next()?;
        let frames = next()?;
        Ok(frames * BYTES_PER_FRAME + seconds * BYTES_PER_SECOND + minutes * BYTES_PER_MINUTE)
    }

    /// Walk the TRACK blocks, accumulating pregap time
    fn parse_tracks(cue_text: &str, file_size: u64) -> Result<Vec<Track>, CdRomError> {
        let mut tracks: Vec<Track> = Vec::new();
        let mut gap = 0u64;
        let mut track_pregap = 0u64;
        let mut pending: Option<(u8, TrackType)> = None;

        for raw_line in cue_text.lines() {
            let line = raw_line.trim_start_matches('\u{feff}').trim();

            if let Some(rest) = line.strip_prefix("TRACK") {
                let mut fields = rest.split_whitespace();
                let number: u8 = fields
                    .next()
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| CdRomError::MalformedCue("bad TRACK number".into()))?;
                let track_type = match fields.next() {
                    Some("AUDIO") => TrackType::Audio,
                    Some("MODE2/2352") => TrackType::Mode2_2352,
                    other => {
                        return Err(CdRomError::MalformedCue(format!(
                            "unrecognised TRACK type {:?}",
                            other
                        )))
                    }
                };
                pending = Some((number, track_type));
            } else if let Some(rest) = line.strip_prefix("PREGAP") {
                let pregap = Self::timestamp_bytes(rest.trim())?;
                gap += pregap;
                track_pregap += pregap;
            } else if let Some(rest) = line.strip_prefix("INDEX") {
                let Some((number, track_type)) = pending.take() else {
                    continue; // INDEX 00 repeats or stray line
                };
                let mut fields = rest.split_whitespace();
                fields.next(); // index number
                let stamp = fields
                    .next()
                    .ok_or_else(|| CdRomError::MalformedCue("INDEX without timestamp".into()))?;
                let start = Self::timestamp_bytes(stamp)? + gap;

                // The previous track ends before this track's pregap;
                // pregap positions have no backing bytes at all
                if let Some(prev) = tracks.last_mut() {
                    prev.end = prev.end.min(start - track_pregap - 1);
                }
                track_pregap = 0;
                tracks.push(Track {
                    number,
                    track_type,
                    start,
                    end: u64::MAX, // patched by the next track / file end
                    offset: gap,
                });
            }
            // Other directives (REM, FLAGS, ...) are skipped
        }

        let Some(last) = tracks.last_mut() else {
            return Err(CdRomError::MalformedCue("no tracks".into()));
        };
        last.end = file_size + last.offset - 1;

        // Earlier tracks end where their successor starts
        for i in 0..tracks.len().saturating_sub(1) {
            let next_start = tracks[i + 1].start;
            let end = &mut tracks[i].end;
            *end = (*end).min(next_start - 1);
        }

        Ok(tracks)
    }
}
