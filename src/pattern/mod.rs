//! Weaving pattern data model.
//!
//! A [`Pattern`] is a weaving draft reduced to what loom control needs:
//! the per-pick shaft lifts, plus enough color and threading data for a
//! client to draw a simple preview.
//!
//! Pick numbers are 1-based. Pick 0 is the background pick ([`Pattern::pick0`])
//! meaning "nothing woven yet", so valid pick numbers are `0..=picks.len()`.
//!
//! - [`wif`] - WIF file reader
//! - [`dtx`] - Fiberworks DTX file reader

mod draft;
pub mod dtx;
pub mod wif;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One pick (weft row) of a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pick {
    /// Weft color, as an index into [`Pattern::color_table`].
    pub color: u32,
    /// One entry per shaft; `true` means the shaft is raised.
    pub are_shafts_up: Vec<bool>,
}

/// A weaving pattern reduced to the essentials for loom control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    /// Unique name (the key in the pattern store).
    pub name: String,
    /// Palette of `#rrggbb` colors.
    pub color_table: Vec<String>,
    /// Palette index for each warp end.
    pub warp_colors: Vec<u32>,
    /// 0-based shaft for each warp end; -1 if the end is unthreaded.
    pub threading: Vec<i32>,
    /// Picks in weaving order (pick number `n` is `picks[n - 1]`).
    pub picks: Vec<Pick>,
    /// Background pick used for pick number 0.
    pub pick0: Pick,
    /// Current pick number, in `0..=picks.len()`.
    #[serde(default)]
    pub pick_number: usize,
    /// Current repeat number. May go to zero or below when weaving backward.
    #[serde(default = "default_repeat_number")]
    pub repeat_number: i64,
}

fn default_repeat_number() -> i64 {
    1
}

/// Errors from pick navigation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SequenceError {
    /// A pick number outside `0..=num_picks`.
    #[error("pick_number={pick_number} not in range [0, {num_picks}]")]
    OutOfRange {
        /// Requested pick number.
        pick_number: i64,
        /// Number of picks in the pattern.
        num_picks: usize,
    },
    /// No pattern is loaded.
    #[error("no pattern loaded")]
    NoPattern,
}

/// Errors from reading a pattern file.
#[derive(Debug, Error)]
pub enum PatternFileError {
    /// The file suffix is not a supported pattern format.
    #[error("unsupported pattern file {name:?}: only .wif and .dtx files are supported")]
    UnsupportedFormat {
        /// File name as given by the client.
        name: String,
    },
    /// A required section is missing.
    #[error("missing [{0}] section")]
    MissingSection(String),
    /// A value could not be parsed.
    #[error("[{section}] {key}={value:?}: {reason}")]
    InvalidValue {
        /// Section name.
        section: String,
        /// Key within the section.
        key: String,
        /// Raw value text.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
    /// An end or pick index beyond what a pattern may hold.
    #[error("[{section}] index {index} exceeds the limit of {max}")]
    TooLarge {
        /// Section holding the index.
        section: String,
        /// 1-based index from the file.
        index: u32,
        /// Largest accepted index.
        max: usize,
    },
    /// The pattern raises no shafts on any pick.
    #[error("no shafts are raised")]
    NoShaftsRaised,
    /// The pattern needs more shafts than the loom has.
    #[error("pattern uses {used} shafts but the loom has {available}")]
    TooManyShafts {
        /// Highest shaft referenced by the pattern.
        used: usize,
        /// Shafts available on the loom.
        available: usize,
    },
}

impl Pattern {
    /// Number of picks (excluding pick 0).
    pub fn num_picks(&self) -> usize {
        self.picks.len()
    }

    /// Step the pick number one pick forward or backward.
    ///
    /// Stepping below 0 wraps to the last pick and decrements the repeat
    /// number; stepping past the last pick wraps to 0 and increments it.
    /// Returns the new pick number.
    pub fn advance(&mut self, forward: bool) -> usize {
        let num_picks = self.picks.len();
        if forward {
            if self.pick_number >= num_picks {
                self.repeat_number += 1;
                self.pick_number = 0;
            } else {
                self.pick_number += 1;
            }
        } else if self.pick_number == 0 {
            self.repeat_number -= 1;
            self.pick_number = num_picks;
        } else {
            self.pick_number -= 1;
        }
        self.pick_number
    }

    /// The pick at the current pick number ([`Pattern::pick0`] for 0).
    pub fn current_pick(&self) -> Result<&Pick, SequenceError> {
        match self.pick_number {
            0 => Ok(&self.pick0),
            n => self.picks.get(n - 1).ok_or(SequenceError::OutOfRange {
                pick_number: n as i64,
                num_picks: self.picks.len(),
            }),
        }
    }

    /// Set the current pick number.
    pub fn set_pick_number(&mut self, pick_number: i64) -> Result<(), SequenceError> {
        self.check_pick_number(pick_number)?;
        self.pick_number = pick_number as usize;
        Ok(())
    }

    /// Check that `pick_number` is in `0..=num_picks`.
    pub fn check_pick_number(&self, pick_number: i64) -> Result<(), SequenceError> {
        let num_picks = self.picks.len();
        if pick_number < 0 || pick_number as usize > num_picks {
            return Err(SequenceError::OutOfRange {
                pick_number,
                num_picks,
            });
        }
        Ok(())
    }
}

/// Parse a pattern file uploaded by a client.
///
/// The format is chosen by the suffix of `name`. The pattern is named after
/// the file name. Picks with more shafts than `num_shafts` are rejected.
pub fn read_pattern_file(name: &str, data: &str, num_shafts: usize) -> Result<Pattern, PatternFileError> {
    let suffix = Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase);
    match suffix.as_deref() {
        Some("wif") => wif::parse_wif(name, data, num_shafts),
        Some("dtx") => dtx::parse_dtx(name, data, num_shafts),
        _ => Err(PatternFileError::UnsupportedFormat {
            name: name.to_string(),
        }),
    }
}
