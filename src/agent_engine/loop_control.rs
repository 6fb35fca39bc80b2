//! Loop guard: halts a run that keeps proposing the same action.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Progressing,
    /// Terminal.
    Stalled,
}

/// `(action kind, text param, index param)` of one proposal. A missing
/// text param keys the same as an empty one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionKey {
    pub kind: String,
    pub text: String,
    pub index: Option<i64>,
}

impl ActionKey {
    pub fn new(kind: impl Into<String>, text: Option<&str>, index: Option<i64>) -> Self {
        Self {
            kind: kind.into(),
            text: text.unwrap_or_default().to_string(),
            index,
        }
    }
}

#[derive(Debug)]
pub struct LoopGuard {
    threshold: u32,
    last_key: Option<ActionKey>,
    consecutive: u32,
    state: GuardState,
}

impl LoopGuard {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            last_key: None,
            consecutive: 0,
            state: GuardState::Progressing,
        }
    }

    /// Feed the key of the latest proposal and return the resulting state.
    pub fn observe(&mut self, key: ActionKey) -> GuardState {
        if self.state == GuardState::Stalled {
            return self.state;
        }
        if self.last_key.as_ref() == Some(&key) {
            self.consecutive += 1;
        } else {
            self.consecutive = 1;
            self.last_key = Some(key);
        }
        if self.consecutive >= self.threshold {
            tracing::warn!(
                repeats = self.consecutive,
                key = ?self.last_key,
                "same action proposed repeatedly, stalling"
            );
            self.state = GuardState::Stalled;
        }
        self.state
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
