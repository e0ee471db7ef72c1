//! Cross-turn product context.
//!
//! Tracks which product a conversation is currently about so follow-up
//! questions without an explicit product name resolve correctly. The
//! binding is only ever overwritten by a newer successful binding
//! (last-mentioned-product-wins); an optional expiry policy can clear a
//! binding after a number of turns without a rebind.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use regex::Regex;

/// Conversation-scoped product focus. Starts `Empty`; a successful bind
/// moves it to `Bound` until a different product takes over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProductBinding {
    #[default]
    Empty,
    Bound {
        product_name: String,
        product_url: String,
    },
}

impl ProductBinding {
    pub fn bound(product_name: impl Into<String>, product_url: impl Into<String>) -> Self {
        ProductBinding::Bound {
            product_name: product_name.into(),
            product_url: product_url.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ProductBinding::Empty)
    }

    pub fn product_name(&self) -> Option<&str> {
        match self {
            ProductBinding::Empty => None,
            ProductBinding::Bound { product_name, .. } => Some(product_name),
        }
    }

    pub fn product_url(&self) -> Option<&str> {
        match self {
            ProductBinding::Empty => None,
            ProductBinding::Bound { product_url, .. } => Some(product_url),
        }
    }

    /// Absorb a binding from the previous assistant turn. The rendered
    /// answer must contain both a product-name line and a detail-page URL;
    /// otherwise the binding is unchanged.
    pub fn absorbed_from_assistant_turn(self, rendered_answer: &str) -> Self {
        match parse_assistant_turn(rendered_answer) {
            Some((product_name, product_url)) => ProductBinding::Bound {
                product_name,
                product_url,
            },
            None => self,
        }
    }
}

fn name_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?mi)^\s*Produktname\s*:\s*(\S.*?)\s*$").expect("valid regex")
    })
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"https?://[^\s"'<>)\]]+"#).expect("valid regex"))
}

/// Extract (product_name, url) from a rendered assistant answer. Both parts
/// must be present.
pub fn parse_assistant_turn(rendered_answer: &str) -> Option<(String, String)> {
    let name = name_line_pattern()
        .captures(rendered_answer)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())?;

    let url = url_pattern()
        .find(rendered_answer)
        .map(|m| m.as_str().trim_end_matches(['.', ',']).to_string())?;

    Some((name, url))
}

#[derive(Debug, Default)]
struct SessionSlot {
    binding: ProductBinding,
    turns_since_bind: u64,
}

/// Per-session context registry. Sessions only ever touch their own slot;
/// the registry is the single place cross-turn state lives.
#[derive(Default)]
pub struct SessionContexts {
    slots: Mutex<HashMap<String, SessionSlot>>,
}

impl SessionContexts {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current binding of a session at the start of a turn.
    pub fn load(&self, session_id: &str) -> ProductBinding {
        self.slots
            .lock()
            .map(|slots| {
                slots
                    .get(session_id)
                    .map(|slot| slot.binding.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Commit the binding at the end of a turn. `rebound` marks that one of
    /// the two bind triggers fired this turn; without it the staleness
    /// counter advances and, with `reset_after_turns > 0`, eventually clears
    /// the binding. `reset_after_turns == 0` never expires.
    pub fn commit(
        &self,
        session_id: &str,
        binding: ProductBinding,
        rebound: bool,
        reset_after_turns: u64,
    ) {
        let Ok(mut slots) = self.slots.lock() else {
            return;
        };

        let slot = slots.entry(session_id.to_string()).or_default();
        slot.binding = binding;

        if rebound {
            slot.turns_since_bind = 0;
            return;
        }

        slot.turns_since_bind = slot.turns_since_bind.saturating_add(1);
        if reset_after_turns > 0 && slot.turns_since_bind >= reset_after_turns {
            slot.binding = ProductBinding::Empty;
        }
    }
}
