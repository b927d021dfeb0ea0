//! WIF (Weaving Information File) reader.
//!
//! WIF is an INI-style text format:
//!
//! ```text
//! [WEAVING]
//! Shafts=4
//! Rising Shed=true
//! [THREADING]
//! 1=1
//! 2=2
//! [LIFTPLAN]
//! 1=1,3
//! ```
//!
//! Section and key names are case-insensitive and `;` starts a comment line.
//! All WIF indices are 1-based; the resulting [`Pattern`] uses 0-based
//! palette and shaft indices.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::draft::{
    check_count, default_colors, invalid, parse_int, parse_int_list, rgb_hex, threaded_shaft, Draft, DEFAULT_WARP_COLOR,
    DEFAULT_WEFT_COLOR,
};
use super::{Pattern, PatternFileError};
use crate::constants::{MAX_PATTERN_PICKS, MAX_WARP_ENDS};

/// Parsed INI sections: lowercase section name -> lowercase key -> raw value.
#[derive(Debug, Default)]
struct Sections {
    sections: HashMap<String, HashMap<String, String>>,
}

impl Sections {
    fn parse(text: &str) -> Self {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current: Option<String> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_ascii_lowercase();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }
            let (Some(section), Some((key, value))) = (current.as_ref(), line.split_once('=')) else {
                log::debug!("[Wif] Ignoring line outside key=value form: {line:?}");
                continue;
            };
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        Self { sections }
    }

    fn get(&self, section: &str) -> Option<&HashMap<String, String>> {
        self.sections.get(section)
    }

    fn require(&self, section: &str) -> Result<&HashMap<String, String>, PatternFileError> {
        self.get(section)
            .ok_or_else(|| PatternFileError::MissingSection(section.to_ascii_uppercase()))
    }

    fn value(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section).and_then(|s| s.get(key)).map(String::as_str)
    }

    /// A section of `index=values` entries, parsed into an ordered map.
    fn indexed_lists(&self, section: &str) -> Result<BTreeMap<u32, Vec<u32>>, PatternFileError> {
        let Some(entries) = self.get(section) else {
            return Ok(BTreeMap::new());
        };
        entries
            .iter()
            .map(|(key, value)| {
                let index = parse_int(section, key, key)?;
                let values = parse_int_list(section, key, value)?;
                Ok((index, values))
            })
            .collect()
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Build the `#rrggbb` palette from [COLOR TABLE] scaled by [COLOR PALETTE] Range.
fn color_table(sections: &Sections) -> Result<Vec<String>, PatternFileError> {
    let table = sections.indexed_lists("color table")?;
    if table.is_empty() {
        return Ok(default_colors());
    }

    let (min, max) = match sections.value("color palette", "range") {
        Some(range) => match parse_int_list("color palette", "range", range)?.as_slice() {
            [min, max] if max > min => (*min, *max),
            _ => return Err(invalid("color palette", "range", range, "expected min,max with max > min")),
        },
        None => (0, 255),
    };

    table
        .iter()
        .map(|(index, rgb)| {
            let [r, g, b] = rgb.as_slice() else {
                return Err(invalid("color table", &index.to_string(), &format!("{rgb:?}"), "expected r,g,b"));
            };
            Ok(rgb_hex(*r, *g, *b, min, max))
        })
        .collect()
}

/// Default palette entry (1-based) from the `Color` key of \[WARP\] or \[WEFT\].
fn default_color(sections: &Sections, section: &str, fallback: u32) -> Result<u32, PatternFileError> {
    match sections.value(section, "color") {
        Some(text) => parse_int_list(section, "color", text)?
            .first()
            .copied()
            .ok_or_else(|| invalid(section, "color", text, "empty color")),
        None => Ok(fallback),
    }
}

/// Palette index (0-based) for entries `1..=count`.
fn color_indices(
    sections: &Sections,
    section: &str,
    count: u32,
    default: u32,
) -> Result<Vec<u32>, PatternFileError> {
    let explicit = sections.indexed_lists(section)?;
    Ok((1..=count)
        .map(|i| {
            explicit
                .get(&i)
                .and_then(|v| v.first().copied())
                .unwrap_or(default)
                .saturating_sub(1)
        })
        .collect())
}

/// Raised shafts (1-based) for each pick `1..=num_picks`.
fn shaft_sets(sections: &Sections) -> Result<Vec<BTreeSet<u32>>, PatternFileError> {
    let liftplan = sections.indexed_lists("liftplan")?;
    if !liftplan.is_empty() {
        let num_picks = liftplan.keys().max().copied().unwrap_or(0);
        check_count("liftplan", num_picks, MAX_PATTERN_PICKS)?;
        return Ok((1..=num_picks)
            .map(|pick| {
                liftplan
                    .get(&pick)
                    .map(|shafts| shafts.iter().copied().filter(|s| *s != 0).collect::<BTreeSet<u32>>())
                    .unwrap_or_default()
            })
            .collect());
    }

    sections
        .get("treadling")
        .ok_or_else(|| PatternFileError::MissingSection("LIFTPLAN or TREADLING".to_string()))?;
    sections.require("tieup")?;
    let treadling = sections.indexed_lists("treadling")?;
    let tieup = sections.indexed_lists("tieup")?;
    let num_picks = treadling.keys().max().copied().unwrap_or(0);
    check_count("treadling", num_picks, MAX_PATTERN_PICKS)?;
    Ok((1..=num_picks)
        .map(|pick| {
            treadling
                .get(&pick)
                .into_iter()
                .flatten()
                .filter(|treadle| **treadle != 0)
                .filter_map(|treadle| tieup.get(treadle))
                .flatten()
                .copied()
                .filter(|s| *s != 0)
                .collect::<BTreeSet<u32>>()
        })
        .collect())
}

/// Parse WIF text into a [`Pattern`] named `name`.
///
/// Fails if the pattern needs more than `max_shafts` shafts.
pub fn parse_wif(name: &str, text: &str, max_shafts: usize) -> Result<Pattern, PatternFileError> {
    let sections = Sections::parse(text);

    let threading = sections.indexed_lists("threading")?;
    sections.require("threading")?;
    let num_ends = threading.keys().max().copied().unwrap_or(0);
    check_count("threading", num_ends, MAX_WARP_ENDS)?;

    let lifts = shaft_sets(&sections)?;
    let num_picks = lifts.len() as u32;

    let rising_shed = sections
        .value("weaving", "rising shed")
        .and_then(parse_bool)
        .unwrap_or(true);

    let warp_default = default_color(&sections, "warp", DEFAULT_WARP_COLOR)?;
    let weft_default = default_color(&sections, "weft", DEFAULT_WEFT_COLOR)?;
    let warp_colors = color_indices(&sections, "warp colors", num_ends, warp_default)?;
    let weft_colors = color_indices(&sections, "weft colors", num_picks, weft_default)?;

    let threading = (1..=num_ends)
        .map(|end| match threading.get(&end) {
            Some(shafts) => threaded_shaft("threading", &end.to_string(), shafts),
            None => Ok(-1),
        })
        .collect::<Result<Vec<i32>, _>>()?;

    Draft {
        color_table: color_table(&sections)?,
        threading,
        warp_colors,
        lifts,
        weft_colors,
        weft_default: weft_default.saturating_sub(1),
        rising_shed,
    }
    .into_pattern(name, max_shafts)
}
