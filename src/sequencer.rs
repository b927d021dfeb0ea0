//! Pick sequencing for the current pattern.
//!
//! [`PickSequencer`] owns the current [`Pattern`] and the pending
//! [`JumpOverride`]. Each time the loom wants a pick, [`PickSequencer::next_pick`]
//! either honors the pending jump or steps one pick in the weave direction,
//! then clears the jump so it applies exactly once.
//!
//! Rust guideline compliant 2026-02

use serde::{Deserialize, Serialize};

use crate::pattern::{Pattern, Pick, SequenceError};

/// A pending one-shot jump, applied on the next pick request.
///
/// Either field may be set independently. The wire form of the empty jump is
/// `{"pick_number": null, "repeat_number": null}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpOverride {
    /// Pick number to jump to.
    pub pick_number: Option<i64>,
    /// Repeat number to jump to.
    pub repeat_number: Option<i64>,
}

impl JumpOverride {
    /// True if neither field is set.
    pub fn is_empty(&self) -> bool {
        self.pick_number.is_none() && self.repeat_number.is_none()
    }
}

/// Result of serving one pick request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickStep {
    /// The pick to weave.
    pub pick: Pick,
    /// Pick number after the step.
    pub pick_number: usize,
    /// Repeat number after the step.
    pub repeat_number: i64,
    /// True if a pending jump was consumed by this step.
    pub jump_consumed: bool,
}

/// Position and pending jump saved before a pick step.
///
/// Restoring it undoes a step whose shaft word never reached the loom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pick_number: usize,
    repeat_number: i64,
    jump: JumpOverride,
}

/// Current pattern plus pending jump.
#[derive(Debug, Default)]
pub struct PickSequencer {
    pattern: Option<Pattern>,
    jump: JumpOverride,
}

impl PickSequencer {
    /// Create an empty sequencer with no pattern.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current pattern, if any.
    pub fn pattern(&self) -> Option<&Pattern> {
        self.pattern.as_ref()
    }

    /// Name of the current pattern, if any.
    pub fn pattern_name(&self) -> Option<&str> {
        self.pattern.as_ref().map(|p| p.name.as_str())
    }

    /// Replace the current pattern, returning the previous one.
    ///
    /// The pending jump is left alone; callers clear it with
    /// [`PickSequencer::clear_jump`] so they can report the change.
    pub fn set_pattern(&mut self, pattern: Pattern) -> Option<Pattern> {
        self.pattern.replace(pattern)
    }

    /// The pending jump.
    pub fn jump(&self) -> JumpOverride {
        self.jump
    }

    /// Store a pending jump.
    ///
    /// # Errors
    ///
    /// [`SequenceError::NoPattern`] if no pattern is loaded, or
    /// [`SequenceError::OutOfRange`] if the pick number is not in
    /// `0..=num_picks`. The pending jump is unchanged on error.
    pub fn set_jump(&mut self, jump: JumpOverride) -> Result<(), SequenceError> {
        let pattern = self.pattern.as_ref().ok_or(SequenceError::NoPattern)?;
        if let Some(pick_number) = jump.pick_number {
            pattern.check_pick_number(pick_number)?;
        }
        self.jump = jump;
        Ok(())
    }

    /// Clear the pending jump. Returns true if it was non-empty.
    pub fn clear_jump(&mut self) -> bool {
        let was_set = !self.jump.is_empty();
        self.jump = JumpOverride::default();
        was_set
    }

    /// Step one pick in the given direction, ignoring any pending jump.
    pub fn advance(&mut self, forward: bool) -> Result<usize, SequenceError> {
        let pattern = self.pattern.as_mut().ok_or(SequenceError::NoPattern)?;
        Ok(pattern.advance(forward))
    }

    /// The pick at the current pick number.
    pub fn current_pick(&self) -> Result<&Pick, SequenceError> {
        self.pattern
            .as_ref()
            .ok_or(SequenceError::NoPattern)?
            .current_pick()
    }

    /// Set the pick number of the current pattern.
    pub fn set_pick_number(&mut self, pick_number: i64) -> Result<(), SequenceError> {
        self.pattern
            .as_mut()
            .ok_or(SequenceError::NoPattern)?
            .set_pick_number(pick_number)
    }

    /// Save the current position and pending jump; `None` without a pattern.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.pattern.as_ref().map(|pattern| Checkpoint {
            pick_number: pattern.pick_number,
            repeat_number: pattern.repeat_number,
            jump: self.jump,
        })
    }

    /// Return to a saved position and pending jump.
    ///
    /// Only meaningful for the pattern the checkpoint was taken from.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        if let Some(pattern) = self.pattern.as_mut() {
            pattern.pick_number = checkpoint.pick_number.min(pattern.picks.len());
            pattern.repeat_number = checkpoint.repeat_number;
            self.jump = checkpoint.jump;
        }
    }

    /// Serve one pick request.
    ///
    /// A pending jump pick number replaces the normal step; a pending jump
    /// repeat number overwrites the repeat number after the pick step. The
    /// jump is cleared either way.
    pub fn next_pick(&mut self, forward: bool) -> Result<PickStep, SequenceError> {
        let jump = self.jump;
        let pattern = self.pattern.as_mut().ok_or(SequenceError::NoPattern)?;

        let stepped = match jump.pick_number {
            Some(pick_number) => pattern.set_pick_number(pick_number),
            None => {
                pattern.advance(forward);
                Ok(())
            }
        };
        if let Some(repeat_number) = jump.repeat_number {
            pattern.repeat_number = repeat_number;
        }
        let jump_consumed = self.clear_jump();
        stepped?;

        let pattern = self.pattern.as_ref().ok_or(SequenceError::NoPattern)?;
        Ok(PickStep {
            pick: pattern.current_pick()?.clone(),
            pick_number: pattern.pick_number,
            repeat_number: pattern.repeat_number,
            jump_consumed,
        })
    }
}
