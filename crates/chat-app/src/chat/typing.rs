use relay_storage::MessageId;

/// Character-by-character reveal of one freshly simulated assistant reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TypingState {
    #[default]
    Idle,
    Typing {
        message_id: MessageId,
        revealed: usize,
    },
    Done {
        message_id: MessageId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingTransition {
    Start(MessageId),
    /// One ticker firing; `total_chars` is the full length of the target message.
    Tick {
        message_id: MessageId,
        total_chars: usize,
    },
    Settle,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingRejection {
    AlreadyTyping {
        active: MessageId,
        attempted: MessageId,
    },
    NotTyping,
    MessageMismatch {
        active: MessageId,
        attempted: MessageId,
    },
    NotDone,
}

pub type TypingTransitionResult = Result<TypingState, TypingRejection>;

impl TypingState {
    pub fn active_message(&self) -> Option<&MessageId> {
        match self {
            Self::Typing { message_id, .. } => Some(message_id),
            Self::Idle | Self::Done { .. } => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Visible part of `content` while `message_id` is being typed; full text otherwise.
    pub fn displayed<'a>(&self, message_id: &MessageId, content: &'a str) -> &'a str {
        match self {
            Self::Typing {
                message_id: active,
                revealed,
            } if active == message_id => {
                let end = content
                    .char_indices()
                    .nth(*revealed)
                    .map(|(index, _)| index)
                    .unwrap_or(content.len());
                &content[..end]
            }
            _ => content,
        }
    }

    /// Applies one transition deterministically.
    ///
    /// A single reveal may run at a time. `Abort` is accepted from every state and always
    /// lands on `Idle` with nothing revealed.
    pub fn apply(&self, transition: TypingTransition) -> TypingTransitionResult {
        match transition {
            TypingTransition::Start(message_id) => self.apply_start(message_id),
            TypingTransition::Tick {
                message_id,
                total_chars,
            } => self.apply_tick(message_id, total_chars),
            TypingTransition::Settle => self.apply_settle(),
            TypingTransition::Abort => Ok(Self::Idle),
        }
    }

    fn apply_start(&self, message_id: MessageId) -> TypingTransitionResult {
        match self {
            Self::Typing { message_id: active, .. } if *active != message_id => {
                Err(TypingRejection::AlreadyTyping {
                    active: active.clone(),
                    attempted: message_id,
                })
            }
            Self::Typing { .. } => Ok(self.clone()),
            Self::Idle | Self::Done { .. } => Ok(Self::Typing {
                message_id,
                revealed: 0,
            }),
        }
    }

    fn apply_tick(&self, message_id: MessageId, total_chars: usize) -> TypingTransitionResult {
        match self {
            Self::Typing {
                message_id: active,
                revealed,
            } if *active == message_id => {
                let revealed = revealed.saturating_add(1);
                if revealed >= total_chars {
                    Ok(Self::Done { message_id })
                } else {
                    Ok(Self::Typing {
                        message_id,
                        revealed,
                    })
                }
            }
            Self::Typing { message_id: active, .. } => Err(TypingRejection::MessageMismatch {
                active: active.clone(),
                attempted: message_id,
            }),
            Self::Idle | Self::Done { .. } => Err(TypingRejection::NotTyping),
        }
    }

    fn apply_settle(&self) -> TypingTransitionResult {
        match self {
            Self::Done { .. } => Ok(Self::Idle),
            Self::Idle | Self::Typing { .. } => Err(TypingRejection::NotDone),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> MessageId {
        MessageId::new(raw)
    }

    #[test]
    fn reveal_runs_to_done_then_idle() {
        let mut state = TypingState::Idle.apply(TypingTransition::Start(id("m1"))).unwrap();
        for expected in 1..3 {
            state = state
                .apply(TypingTransition::Tick {
                    message_id: id("m1"),
                    total_chars: 3,
                })
                .unwrap();
            assert_eq!(
                state,
                TypingState::Typing {
                    message_id: id("m1"),
                    revealed: expected
                }
            );
        }
        state = state
            .apply(TypingTransition::Tick {
                message_id: id("m1"),
                total_chars: 3,
            })
            .unwrap();
        assert_eq!(state, TypingState::Done { message_id: id("m1") });
        assert_eq!(state.apply(TypingTransition::Settle), Ok(TypingState::Idle));
    }

    #[test]
    fn second_start_for_another_message_is_rejected() {
        let state = TypingState::Idle.apply(TypingTransition::Start(id("m1"))).unwrap();
        assert_eq!(
            state.apply(TypingTransition::Start(id("m2"))),
            Err(TypingRejection::AlreadyTyping {
                active: id("m1"),
                attempted: id("m2"),
            })
        );
        assert_eq!(state.apply(TypingTransition::Start(id("m1"))), Ok(state.clone()));
    }

    #[test]
    fn abort_clears_progress_from_any_state() {
        let typing = TypingState::Typing {
            message_id: id("m1"),
            revealed: 4,
        };
        assert_eq!(typing.apply(TypingTransition::Abort), Ok(TypingState::Idle));
        assert_eq!(TypingState::Idle.apply(TypingTransition::Abort), Ok(TypingState::Idle));
    }

    #[test]
    fn ticks_outside_a_reveal_are_rejected() {
        assert_eq!(
            TypingState::Idle.apply(TypingTransition::Tick {
                message_id: id("m1"),
                total_chars: 2,
            }),
            Err(TypingRejection::NotTyping)
        );
        assert_eq!(
            TypingState::Idle.apply(TypingTransition::Settle),
            Err(TypingRejection::NotDone)
        );
    }

    #[test]
    fn displayed_text_respects_char_boundaries() {
        let state = TypingState::Typing {
            message_id: id("m1"),
            revealed: 2,
        };
        assert_eq!(state.displayed(&id("m1"), "Привет"), "Пр");
        assert_eq!(state.displayed(&id("m2"), "Привет"), "Привет");
        assert_eq!(TypingState::Idle.displayed(&id("m1"), "Hi"), "Hi");
    }
}
