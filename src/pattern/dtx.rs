//! Fiberworks DTX reader.
//!
//! DTX is a line-oriented text format with `@@` section headers:
//!
//! ```text
//! @@StartDTX
//! @@Info
//! Title  Twill
//! @@Threading
//! 1 2 3 4
//! @@Tieup
//! 1 2
//! 2 3
//! @@Treadling
//! 1 2 1,2
//! @@Color Palet
//! 65535,65535,65535 0,0,0
//! @@Warp colors
//! 1 1 1 1
//! @@Weft colors
//! 2 2 1
//! @@EndDTX
//! ```
//!
//! Threading, treadling, liftplan and color sections hold one
//! whitespace-separated token per end or pick, in order. A token may be a
//! comma list, and 0 means none. Tie-up line `n` lists the shafts tied to
//! treadle `n`. Palette entries are `r,g,b` on a 0..=255 scale, or
//! 0..=65535 if any channel exceeds 255. A rising shed is assumed.

use std::collections::{BTreeSet, HashMap};

use super::draft::{
    check_count, default_colors, invalid, parse_int, parse_int_list, rgb_hex, threaded_shaft, Draft, DEFAULT_WARP_COLOR,
    DEFAULT_WEFT_COLOR,
};
use super::{Pattern, PatternFileError};
use crate::constants::{MAX_PATTERN_PICKS, MAX_WARP_ENDS};

/// Lines of each `@@` section, keyed by lowercase name.
#[derive(Debug, Default)]
struct Sections {
    sections: HashMap<String, Vec<String>>,
}

impl Sections {
    fn parse(text: &str) -> Self {
        let mut sections: HashMap<String, Vec<String>> = HashMap::new();
        let mut current: Option<String> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            if let Some(header) = line.strip_prefix("@@") {
                let name = match header.trim().to_ascii_lowercase().as_str() {
                    "end" | "enddtx" => break,
                    "color palet" => "color palette".to_string(),
                    other => other.to_string(),
                };
                sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }
            match current.as_ref() {
                Some(section) => sections.entry(section.clone()).or_default().push(line.to_string()),
                None => log::debug!("[Dtx] Ignoring line before first section: {line:?}"),
            }
        }

        Self { sections }
    }

    fn has(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    fn lines(&self, section: &str) -> &[String] {
        self.sections.get(section).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whitespace-separated tokens of a section, in order.
    fn tokens(&self, section: &str, max: usize) -> Result<Vec<&str>, PatternFileError> {
        let tokens: Vec<&str> = self.lines(section).iter().flat_map(|l| l.split_whitespace()).collect();
        check_count(section, u32::try_from(tokens.len()).unwrap_or(u32::MAX), max)?;
        Ok(tokens)
    }

    /// One comma list per token; token `i` is entry `i + 1`.
    fn lists(&self, section: &str, max: usize) -> Result<Vec<Vec<u32>>, PatternFileError> {
        self.tokens(section, max)?
            .iter()
            .enumerate()
            .map(|(i, token)| parse_int_list(section, &(i + 1).to_string(), token))
            .collect()
    }
}

fn nonzero(values: &[u32]) -> BTreeSet<u32> {
    values.iter().copied().filter(|v| *v != 0).collect()
}

fn color_table(sections: &Sections) -> Result<Vec<String>, PatternFileError> {
    let entries = sections.lists("color palette", MAX_WARP_ENDS)?;
    if entries.is_empty() {
        return Ok(default_colors());
    }
    let max = if entries.iter().flatten().any(|v| *v > 255) { 65535 } else { 255 };
    entries
        .iter()
        .enumerate()
        .map(|(i, rgb)| match rgb.as_slice() {
            [r, g, b] => Ok(rgb_hex(*r, *g, *b, 0, max)),
            _ => Err(invalid("color palette", &(i + 1).to_string(), &format!("{rgb:?}"), "expected r,g,b")),
        })
        .collect()
}

/// 0-based palette index for entries `1..=count`.
fn color_indices(
    sections: &Sections,
    section: &str,
    count: usize,
    max: usize,
    default: u32,
) -> Result<Vec<u32>, PatternFileError> {
    let explicit = sections.lists(section, max)?;
    Ok((0..count)
        .map(|i| {
            explicit
                .get(i)
                .and_then(|v| v.first().copied())
                .unwrap_or(default)
                .saturating_sub(1)
        })
        .collect())
}

/// Shafts (1-based) for each pick, from the liftplan or treadling times tie-up.
fn shaft_sets(sections: &Sections) -> Result<Vec<BTreeSet<u32>>, PatternFileError> {
    if sections.has("liftplan") {
        return Ok(sections
            .lists("liftplan", MAX_PATTERN_PICKS)?
            .iter()
            .map(|shafts| nonzero(shafts))
            .collect());
    }
    if !sections.has("treadling") {
        return Err(PatternFileError::MissingSection("LIFTPLAN or TREADLING".to_string()));
    }
    if !sections.has("tieup") {
        return Err(PatternFileError::MissingSection("TIEUP".to_string()));
    }

    let tieup = sections
        .lines("tieup")
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let key = (i + 1).to_string();
            line.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|item| !item.is_empty())
                .map(|item| parse_int("tieup", &key, item))
                .collect::<Result<Vec<u32>, _>>()
                .map(|shafts| nonzero(&shafts))
        })
        .collect::<Result<Vec<BTreeSet<u32>>, _>>()?;

    Ok(sections
        .lists("treadling", MAX_PATTERN_PICKS)?
        .iter()
        .map(|treadles| {
            treadles
                .iter()
                .filter(|treadle| **treadle != 0)
                .filter_map(|treadle| tieup.get(*treadle as usize - 1))
                .flatten()
                .copied()
                .collect()
        })
        .collect())
}

/// Parse DTX text into a [`Pattern`] named `name`.
///
/// Fails if the pattern needs more than `max_shafts` shafts.
pub fn parse_dtx(name: &str, text: &str, max_shafts: usize) -> Result<Pattern, PatternFileError> {
    let sections = Sections::parse(text);
    if !sections.has("threading") {
        return Err(PatternFileError::MissingSection("THREADING".to_string()));
    }

    let threading = sections
        .lists("threading", MAX_WARP_ENDS)?
        .iter()
        .enumerate()
        .map(|(i, shafts)| threaded_shaft("threading", &(i + 1).to_string(), shafts))
        .collect::<Result<Vec<i32>, _>>()?;
    let lifts = shaft_sets(&sections)?;

    let warp_colors = color_indices(&sections, "warp colors", threading.len(), MAX_WARP_ENDS, DEFAULT_WARP_COLOR)?;
    let weft_colors = color_indices(&sections, "weft colors", lifts.len(), MAX_PATTERN_PICKS, DEFAULT_WEFT_COLOR)?;

    Draft {
        color_table: color_table(&sections)?,
        threading,
        warp_colors,
        lifts,
        weft_colors,
        weft_default: DEFAULT_WEFT_COLOR - 1,
        rising_shed: true,
    }
    .into_pattern(name, max_shafts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREADLING_DTX: &str = "\
@@StartDTX
@@Info
Title  Twill
@@Threading
1 2 3
4 0
@@Tieup
1 2
2,3
@@Treadling
1 2
1,2 0
@@Color Palet
65535,65535,65535 0,0,0
65535,0,0
@@Warp colors
1 1 3
@@Weft colors
2 3
@@EndDTX
@@Liftplan
9
";

    #[test]
    fn test_parse_treadling() {
        let pattern = parse_dtx("twill.dtx", TREADLING_DTX, 8).unwrap();
        assert_eq!(pattern.name, "twill.dtx");
        assert_eq!(pattern.threading, vec![0, 1, 2, 3, -1]);
        assert_eq!(pattern.color_table, vec!["#ffffff", "#000000", "#ff0000"]);
        assert_eq!(pattern.warp_colors, vec![0, 0, 2, 0, 0]);
        assert_eq!(pattern.num_picks(), 4);
        assert_eq!(pattern.picks[0].are_shafts_up, vec![true, true, false]);
        assert_eq!(pattern.picks[1].are_shafts_up, vec![false, true, true]);
        assert_eq!(pattern.picks[2].are_shafts_up, vec![true, true, true]);
        assert_eq!(pattern.picks[3].are_shafts_up, vec![false, false, false]);
        assert_eq!(pattern.picks[0].color, 1);
        assert_eq!(pattern.picks[1].color, 2);
        assert_eq!(pattern.picks[3].color, 1);
        assert_eq!(pattern.pick0.color, 1);
    }

    #[test]
    fn test_parse_liftplan_with_byte_palette() {
        let text = "@@threading\n1 2\n@@LIFTPLAN\n1,3 2\n@@Color Palette\n255,128,0\n";
        let pattern = parse_dtx("lift.dtx", text, 8).unwrap();
        assert_eq!(pattern.picks[0].are_shafts_up, vec![true, false, true]);
        assert_eq!(pattern.picks[1].are_shafts_up, vec![false, true, false]);
        assert_eq!(pattern.color_table, vec!["#ff8000"]);
    }

    #[test]
    fn test_parse_missing_sections() {
        let err = parse_dtx("x.dtx", "@@Liftplan\n1\n", 8).unwrap_err();
        assert!(matches!(err, PatternFileError::MissingSection(s) if s == "THREADING"));
        let err = parse_dtx("x.dtx", "@@Threading\n1\n", 8).unwrap_err();
        assert!(matches!(err, PatternFileError::MissingSection(_)));
        let err = parse_dtx("x.dtx", "@@Threading\n1\n@@Treadling\n1\n", 8).unwrap_err();
        assert!(matches!(err, PatternFileError::MissingSection(s) if s == "TIEUP"));
    }

    #[test]
    fn test_parse_too_many_shafts() {
        let err = parse_dtx("x.dtx", "@@Threading\n1\n@@Liftplan\n12\n", 8).unwrap_err();
        assert!(matches!(err, PatternFileError::TooManyShafts { used: 12, available: 8 }));
    }

    #[test]
    fn test_parse_bad_tokens() {
        let err = parse_dtx("x.dtx", "@@Threading\n1 x\n@@Liftplan\n1\n", 8).unwrap_err();
        assert!(matches!(err, PatternFileError::InvalidValue { ref key, .. } if key == "2"));
        let err = parse_dtx("x.dtx", "@@Threading\n3000000000\n@@Liftplan\n1\n", 8).unwrap_err();
        assert!(matches!(err, PatternFileError::InvalidValue { ref section, .. } if section == "THREADING"));
        let err = parse_dtx("x.dtx", "@@Threading\n1\n@@Liftplan\n1\n@@Color Palet\n1,2\n", 8).unwrap_err();
        assert!(matches!(err, PatternFileError::InvalidValue { ref section, .. } if section == "COLOR PALETTE"));
    }

    #[test]
    fn test_parse_too_many_picks() {
        let liftplan = "1 ".repeat(MAX_PATTERN_PICKS + 1);
        let text = format!("@@Threading\n1\n@@Liftplan\n{liftplan}\n");
        let err = parse_dtx("big.dtx", &text, 8).unwrap_err();
        assert!(matches!(err, PatternFileError::TooLarge { ref section, .. } if section == "LIFTPLAN"));
    }
}
