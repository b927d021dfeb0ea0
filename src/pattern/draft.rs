//! Format-independent draft, shared by the file readers.
//!
//! Readers fill a [`Draft`] with 1-based shaft numbers and 0-based palette
//! indices; [`Draft::into_pattern`] checks it against the loom and builds
//! the [`Pattern`].

use std::collections::BTreeSet;

use super::{Pattern, PatternFileError, Pick};

/// Colors used when the file has no palette.
const DEFAULT_COLORS: [&str; 2] = ["#ffffff", "#000000"];

/// Default warp palette entry (1-based).
pub(crate) const DEFAULT_WARP_COLOR: u32 = 1;

/// Default weft palette entry (1-based).
pub(crate) const DEFAULT_WEFT_COLOR: u32 = 2;

pub(crate) fn default_colors() -> Vec<String> {
    DEFAULT_COLORS.iter().map(ToString::to_string).collect()
}

/// A weaving draft as read from a file.
#[derive(Debug, Clone)]
pub(crate) struct Draft {
    /// Palette of `#rrggbb` colors.
    pub color_table: Vec<String>,
    /// 0-based shaft for each end; -1 if unthreaded.
    pub threading: Vec<i32>,
    /// Palette index for each end.
    pub warp_colors: Vec<u32>,
    /// Raised (or, with a sinking shed, lowered) 1-based shafts for each pick.
    pub lifts: Vec<BTreeSet<u32>>,
    /// Palette index for each pick.
    pub weft_colors: Vec<u32>,
    /// Palette index used for pick 0.
    pub weft_default: u32,
    /// Whether `lifts` lists raised shafts.
    pub rising_shed: bool,
}

impl Draft {
    /// Reduce to a [`Pattern`], rejecting drafts that need more than `max_shafts`.
    pub fn into_pattern(self, name: &str, max_shafts: usize) -> Result<Pattern, PatternFileError> {
        let num_shafts = self
            .lifts
            .iter()
            .filter_map(|set| set.iter().max())
            .max()
            .copied()
            .ok_or(PatternFileError::NoShaftsRaised)? as usize;
        if num_shafts > max_shafts {
            return Err(PatternFileError::TooManyShafts {
                used: num_shafts,
                available: max_shafts,
            });
        }

        let weft_default = self.weft_default;
        let rising_shed = self.rising_shed;
        let picks = self
            .lifts
            .iter()
            .enumerate()
            .map(|(i, lifted)| Pick {
                color: self.weft_colors.get(i).copied().unwrap_or(weft_default),
                are_shafts_up: (1..=num_shafts as u32)
                    .map(|shaft| lifted.contains(&shaft) == rising_shed)
                    .collect(),
            })
            .collect();

        Ok(Pattern {
            name: name.to_string(),
            color_table: self.color_table,
            warp_colors: self.warp_colors,
            threading: self.threading,
            picks,
            pick0: Pick {
                color: weft_default,
                are_shafts_up: vec![false; num_shafts],
            },
            pick_number: 0,
            repeat_number: 1,
        })
    }
}

pub(crate) fn invalid(section: &str, key: &str, value: &str, reason: impl Into<String>) -> PatternFileError {
    PatternFileError::InvalidValue {
        section: section.to_ascii_uppercase(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

pub(crate) fn parse_int(section: &str, key: &str, text: &str) -> Result<u32, PatternFileError> {
    text.trim()
        .parse::<u32>()
        .map_err(|e| invalid(section, key, text, e.to_string()))
}

pub(crate) fn parse_int_list(section: &str, key: &str, text: &str) -> Result<Vec<u32>, PatternFileError> {
    text.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse_int(section, key, item))
        .collect()
}

/// Reject a 1-based end or pick index above `max`.
pub(crate) fn check_count(section: &str, index: u32, max: usize) -> Result<(), PatternFileError> {
    if index as usize > max {
        return Err(PatternFileError::TooLarge {
            section: section.to_ascii_uppercase(),
            index,
            max,
        });
    }
    Ok(())
}

/// 0-based threading entry for one end: its lowest nonzero shaft, or -1.
pub(crate) fn threaded_shaft(section: &str, key: &str, shafts: &[u32]) -> Result<i32, PatternFileError> {
    match shafts.iter().copied().filter(|s| *s != 0).min() {
        Some(shaft) => i32::try_from(shaft - 1)
            .map_err(|_| invalid(section, key, &shaft.to_string(), "shaft number out of range")),
        None => Ok(-1),
    }
}

/// `#rrggbb` from channels in `0..=max`.
pub(crate) fn rgb_hex(r: u32, g: u32, b: u32, min: u32, max: u32) -> String {
    let span = u64::from(max.saturating_sub(min).max(1));
    let channel = |v: u32| (u64::from(v.saturating_sub(min)) * 255 / span).min(255);
    format!("#{:02x}{:02x}{:02x}", channel(r), channel(g), channel(b))
}
