//! Text input (input method) state
//!
//! Mirrors one `zwp_text_input_v3` object per seat. The toolkit names the
//! window whose text field has focus; the state machine answers with the
//! enable/disable/commit requests to send. Compositor events are
//! double-buffered and take effect together on `done`, where the committed
//! string becomes ordinary text input and the preedit goes to the client.

use super::{InputEvent, Routed};
use crate::geometry::PixelRect;
use crate::window::WindowId;
use bitflags::bitflags;
use log::{debug, trace};

bitflags! {
    /// Content hints, with the protocol's wire values
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ContentHints: u32 {
        const COMPLETION = 1 << 0;
        const SPELLCHECK = 1 << 1;
        const AUTO_CAPITALIZATION = 1 << 2;
        const LOWERCASE = 1 << 3;
        const UPPERCASE = 1 << 4;
        const TITLECASE = 1 << 5;
        const HIDDEN_TEXT = 1 << 6;
        const SENSITIVE_DATA = 1 << 7;
        const LATIN = 1 << 8;
        const MULTILINE = 1 << 9;
    }
}

/// What the focused field expects to receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentPurpose {
    #[default]
    Normal,
    Alpha,
    Digits,
    Number,
    Phone,
    Url,
    Email,
    Name,
    Password,
    Pin,
}

/// Toolkit-level description of the focused text field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextInputOptions {
    pub lowercase: bool,
    pub uppercase: bool,
    pub multiline: bool,
    pub auto_capitalization: bool,
    /// Passwords and other text the input method must not learn
    pub sensitive: bool,
    pub purpose: ContentPurpose,
}

impl TextInputOptions {
    pub fn hints(&self) -> ContentHints {
        let mut hints = ContentHints::empty();
        hints.set(ContentHints::LOWERCASE, self.lowercase);
        hints.set(ContentHints::UPPERCASE, self.uppercase);
        hints.set(ContentHints::MULTILINE, self.multiline);
        hints.set(ContentHints::AUTO_CAPITALIZATION, self.auto_capitalization);
        hints.set(ContentHints::SENSITIVE_DATA, self.sensitive);
        hints
    }
}

/// The window currently accepting text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextInputClient {
    pub window: WindowId,
    /// Whether the client renders composition text itself
    pub supports_preedit: bool,
}

/// Requests on the seat's text input object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextInputRequest {
    Enable,
    Disable,
    SetCursorRectangle(PixelRect),
    SetContentType {
        hints: ContentHints,
        purpose: ContentPurpose,
    },
    /// Applies the pending state on the compositor side
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Preedit {
    text: String,
    cursor: Option<(usize, usize)>,
}

#[derive(Debug, Default)]
pub struct TextInputState {
    client: Option<TextInputClient>,
    entered: Option<WindowId>,
    pending_preedit: Option<Preedit>,
    pending_commit: Option<String>,
    /// Window showing a non-empty preedit
    preedit_shown: Option<WindowId>,
}

impl TextInputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> Option<TextInputClient> {
        self.client
    }

    /// Surface the compositor routes input method text to
    pub fn entered(&self) -> Option<WindowId> {
        self.entered
    }

    /// Switches the text field; `None` turns the input method off
    pub fn set_client(&mut self, client: Option<TextInputClient>) -> Vec<TextInputRequest> {
        debug!("⌨️ Text input client now {:?}", client);
        if self.client.map(|c| c.window) != client.map(|c| c.window) {
            self.preedit_shown = None;
        }
        self.client = client;
        let toggle = if client.is_some() {
            TextInputRequest::Enable
        } else {
            TextInputRequest::Disable
        };
        vec![toggle, TextInputRequest::Commit]
    }

    pub fn set_cursor_rect(&mut self, rect: PixelRect) -> Vec<TextInputRequest> {
        vec![
            TextInputRequest::SetCursorRectangle(rect),
            TextInputRequest::Commit,
        ]
    }

    pub fn set_options(&mut self, options: &TextInputOptions) -> Vec<TextInputRequest> {
        vec![
            TextInputRequest::SetContentType {
                hints: options.hints(),
                purpose: options.purpose,
            },
            TextInputRequest::Commit,
        ]
    }

    /// Drops the input method's composition by cycling enable
    pub fn reset(&mut self) -> Vec<TextInputRequest> {
        if self.client.is_none() {
            return Vec::new();
        }
        vec![
            TextInputRequest::Disable,
            TextInputRequest::Enable,
            TextInputRequest::Commit,
        ]
    }

    /// Re-enables a fresh text input object for the current client
    pub fn resume(&mut self) -> Vec<TextInputRequest> {
        if self.client.is_none() {
            return Vec::new();
        }
        vec![TextInputRequest::Enable, TextInputRequest::Commit]
    }

    pub fn enter(&mut self, window: Option<WindowId>) {
        self.entered = window;
    }

    pub fn leave(&mut self) {
        self.entered = None;
        self.pending_preedit = None;
        self.pending_commit = None;
    }

    /// Byte offsets into `text`; a negative cursor hides it
    pub fn preedit_string(&mut self, text: Option<String>, cursor_begin: i32, cursor_end: i32) {
        let cursor = match (usize::try_from(cursor_begin), usize::try_from(cursor_end)) {
            (Ok(begin), Ok(end)) => Some((begin, end)),
            _ => None,
        };
        self.pending_preedit = Some(Preedit {
            text: text.unwrap_or_default(),
            cursor,
        });
    }

    pub fn commit_string(&mut self, text: Option<String>) {
        self.pending_commit = text;
    }

    pub fn delete_surrounding_text(&mut self, before_length: u32, after_length: u32) {
        // No surrounding text is ever reported, so there is nothing to delete
        trace!(
            "Ignoring delete_surrounding_text({}, {})",
            before_length,
            after_length
        );
    }

    /// Applies the buffered events; text goes to the entered surface, or to
    /// `keyboard_focus` when the compositor named none of ours
    pub fn done(&mut self, serial: u32, keyboard_focus: Option<WindowId>) -> Vec<Routed> {
        trace!("Text input done, serial {}", serial);
        let mut routed = Vec::new();

        let commit = self.pending_commit.take().filter(|text| !text.is_empty());
        if let (Some(text), Some(window)) = (commit, self.entered.or(keyboard_focus)) {
            routed.push(Routed {
                window,
                event: InputEvent::Text { text, time: 0 },
            });
        }

        // A batch without preedit_string means the preedit is now empty
        let preedit = self.pending_preedit.take().unwrap_or(Preedit {
            text: String::new(),
            cursor: None,
        });
        let Some(client) = self.client.filter(|client| client.supports_preedit) else {
            return routed;
        };
        if !preedit.text.is_empty() {
            self.preedit_shown = Some(client.window);
            routed.push(Routed {
                window: client.window,
                event: InputEvent::Preedit {
                    text: preedit.text,
                    cursor: preedit.cursor,
                },
            });
        } else if let Some(window) = self.preedit_shown.take() {
            routed.push(Routed {
                window,
                event: InputEvent::Preedit {
                    text: String::new(),
                    cursor: None,
                },
            });
        }
        routed
    }

    /// Returns whether the window was the text input client
    pub fn forget_window(&mut self, window: WindowId) -> bool {
        if self.entered == Some(window) {
            self.entered = None;
        }
        if self.preedit_shown == Some(window) {
            self.preedit_shown = None;
        }
        if self.client.map(|client| client.window) == Some(window) {
            self.client = None;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELD: WindowId = WindowId(1);

    fn client(supports_preedit: bool) -> Option<TextInputClient> {
        Some(TextInputClient {
            window: FIELD,
            supports_preedit,
        })
    }

    #[test]
    fn test_options_map_to_hints() {
        let options = TextInputOptions {
            multiline: true,
            sensitive: true,
            purpose: ContentPurpose::Password,
            ..Default::default()
        };
        assert_eq!(
            options.hints(),
            ContentHints::MULTILINE | ContentHints::SENSITIVE_DATA
        );
        assert_eq!(ContentHints::MULTILINE.bits(), 0x200);
        assert_eq!(TextInputOptions::default().hints(), ContentHints::empty());
    }

    #[test]
    fn test_client_toggles_enable() {
        let mut state = TextInputState::new();
        assert_eq!(
            state.set_client(client(false)),
            vec![TextInputRequest::Enable, TextInputRequest::Commit]
        );
        assert_eq!(
            state.reset(),
            vec![
                TextInputRequest::Disable,
                TextInputRequest::Enable,
                TextInputRequest::Commit
            ]
        );
        assert_eq!(
            state.set_client(None),
            vec![TextInputRequest::Disable, TextInputRequest::Commit]
        );
        assert!(state.reset().is_empty());
        assert!(state.resume().is_empty());
    }

    #[test]
    fn test_commit_waits_for_done() {
        let mut state = TextInputState::new();
        state.set_client(client(false));
        state.enter(Some(FIELD));
        state.commit_string(Some("日本".to_string()));
        state.preedit_string(Some("ご".to_string()), 0, 3);

        let routed = state.done(1, None);
        assert_eq!(
            routed,
            vec![Routed {
                window: FIELD,
                event: InputEvent::Text {
                    text: "日本".to_string(),
                    time: 0
                },
            }]
        );
        assert!(state.done(2, None).is_empty());
    }

    #[test]
    fn test_commit_falls_back_to_keyboard_focus() {
        let mut state = TextInputState::new();
        state.commit_string(Some("x".to_string()));
        let routed = state.done(1, Some(WindowId(7)));
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].window, WindowId(7));

        state.commit_string(Some("y".to_string()));
        assert!(state.done(2, None).is_empty());
    }

    #[test]
    fn test_preedit_shown_then_cleared() {
        let mut state = TextInputState::new();
        state.set_client(client(true));
        state.enter(Some(FIELD));

        state.preedit_string(Some("かん".to_string()), 6, -1);
        assert_eq!(
            state.done(1, None),
            vec![Routed {
                window: FIELD,
                event: InputEvent::Preedit {
                    text: "かん".to_string(),
                    cursor: None
                },
            }]
        );

        // An empty batch clears the shown preedit once
        let cleared = state.done(2, None);
        assert_eq!(
            cleared,
            vec![Routed {
                window: FIELD,
                event: InputEvent::Preedit {
                    text: String::new(),
                    cursor: None
                },
            }]
        );
        assert!(state.done(3, None).is_empty());
    }

    #[test]
    fn test_forgotten_client_is_dropped() {
        let mut state = TextInputState::new();
        state.set_client(client(true));
        state.enter(Some(FIELD));
        assert!(state.forget_window(FIELD));
        assert!(state.client().is_none());
        assert!(state.entered().is_none());
        assert!(!state.forget_window(FIELD));
    }
}
