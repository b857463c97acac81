//! Reaction-driven paging over a fixed set of pages.
//!
//! [`Pager`] is the pure state machine; [`PagerSession`] drives it against the
//! gateway and the [`ReactionHub`].

mod hub;
mod session;

use std::collections::HashMap;

pub use hub::{ReactionHub, ReactionSubscription};
pub use session::PagerSession;

use crate::gateway::types::{Page, PageField};

pub const ITEMS_PER_PAGE: usize = 4;
pub const INFO_EMOJI: &str = "\u{2139}\u{fe0f}";

/// What a control reaction does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Control {
    First,
    Prev,
    Next,
    Last,
    Stop,
    /// Go to a named page.
    Jump(String),
    /// Go to a named page, or back to where we were if already on it.
    Toggle(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PageKey {
    Index(usize),
    Named(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PagerState {
    Active(PageKey),
    Expired,
}

/// The default control row: first, previous, next, last, stop.
pub fn default_controls() -> Vec<(String, Control)> {
    vec![
        ("\u{23ee}".to_string(), Control::First),
        ("\u{25c0}".to_string(), Control::Prev),
        ("\u{25b6}".to_string(), Control::Next),
        ("\u{23ed}".to_string(), Control::Last),
        ("\u{23f9}".to_string(), Control::Stop),
    ]
}

/// Ordered pages plus named pages. Immutable once built.
#[derive(Clone, Debug, Default)]
pub struct PageSet {
    pages: Vec<Page>,
    named: HashMap<String, Page>,
}

impl PageSet {
    pub fn new(pages: Vec<Page>) -> Self {
        Self {
            pages,
            named: HashMap::new(),
        }
    }

    /// Group `items` four to a page. Every page gets `title`, `description`
    /// and a footer ending in `Page n of m`.
    pub fn chunked(title: &str, description: &str, footer: &str, items: Vec<PageField>) -> Self {
        let chunks: Vec<&[PageField]> = items.chunks(ITEMS_PER_PAGE).collect();
        let total = chunks.len();
        let pages = chunks
            .into_iter()
            .enumerate()
            .map(|(i, fields)| {
                let footer = if footer.is_empty() {
                    format!("Page {} of {total}", i + 1)
                } else {
                    format!("{footer} | Page {} of {total}", i + 1)
                };
                Page {
                    title: title.to_string(),
                    description: description.to_string(),
                    fields: fields.to_vec(),
                    footer: Some(footer),
                }
            })
            .collect();
        Self::new(pages)
    }

    pub fn with_named(mut self, key: impl Into<String>, page: Page) -> Self {
        self.named.insert(key.into(), page);
        self
    }

    pub fn get(&self, key: &PageKey) -> Option<&Page> {
        match key {
            PageKey::Index(i) => self.pages.get(*i),
            PageKey::Named(name) => self.named.get(name),
        }
    }

    /// Number of sequential pages (named pages excluded).
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.named.is_empty()
    }

    /// Every renderable page, sequential and named.
    pub fn total(&self) -> usize {
        self.pages.len() + self.named.len()
    }
}

#[derive(Clone, Debug)]
pub struct Pager {
    pages: PageSet,
    controls: Vec<(String, Control)>,
    current: PageKey,
    // Last sequential page shown; named pages return here.
    last_index: usize,
    expired: bool,
    auto_remove: bool,
}

impl Pager {
    pub fn new(pages: PageSet) -> Self {
        Self {
            pages,
            controls: default_controls(),
            current: PageKey::Index(0),
            last_index: 0,
            expired: false,
            auto_remove: false,
        }
    }

    /// Put extra controls in front of the current row.
    pub fn with_extra_controls(mut self, extra: Vec<(String, Control)>) -> Self {
        let mut controls = extra;
        controls.append(&mut self.controls);
        self.controls = controls;
        self
    }

    /// Start somewhere other than the first page. Unknown keys are ignored.
    pub fn start_at(mut self, key: PageKey) -> Self {
        self.go_to(key);
        self
    }

    pub fn auto_remove(mut self, enabled: bool) -> Self {
        self.auto_remove = enabled;
        self
    }

    pub fn wants_auto_remove(&self) -> bool {
        self.auto_remove
    }

    /// A single renderable page is static: no controls, no reaction collection.
    pub fn is_interactive(&self) -> bool {
        self.pages.total() > 1
    }

    /// Emoji to offer, in display order.
    pub fn controls(&self) -> Vec<&str> {
        if !self.is_interactive() {
            return Vec::new();
        }
        self.controls.iter().map(|(e, _)| e.as_str()).collect()
    }

    pub fn state(&self) -> PagerState {
        if self.expired {
            PagerState::Expired
        } else {
            PagerState::Active(self.current.clone())
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn expire(&mut self) {
        self.expired = true;
    }

    pub fn current(&self) -> &PageKey {
        &self.current
    }

    /// The page to show. Still the last page after expiry.
    pub fn render(&self) -> Option<&Page> {
        self.pages.get(&self.current)
    }

    /// Jump to `key`; returns whether the current page changed.
    pub fn go_to(&mut self, key: PageKey) -> bool {
        let key = match key {
            PageKey::Index(i) => PageKey::Index(i.min(self.pages.len().saturating_sub(1))),
            other => other,
        };
        if key == self.current || self.pages.get(&key).is_none() {
            return false;
        }
        if let PageKey::Index(i) = key {
            self.last_index = i;
        }
        self.current = key;
        true
    }

    /// Apply a reaction; returns whether the state changed.
    pub fn accept(&mut self, emoji: &str) -> bool {
        if self.expired || !self.is_interactive() {
            return false;
        }
        let Some(control) = self
            .controls
            .iter()
            .find(|(e, _)| e == emoji)
            .map(|(_, c)| c.clone())
        else {
            return false;
        };

        let last = self.pages.len().saturating_sub(1);
        match control {
            Control::Stop => {
                self.expired = true;
                true
            }
            Control::First => self.go_to(PageKey::Index(0)),
            Control::Last => self.go_to(PageKey::Index(last)),
            Control::Prev => match self.current {
                PageKey::Index(i) => self.go_to(PageKey::Index(i.saturating_sub(1))),
                PageKey::Named(_) => self.go_to(PageKey::Index(self.last_index)),
            },
            Control::Next => match self.current {
                PageKey::Index(i) => self.go_to(PageKey::Index((i + 1).min(last))),
                PageKey::Named(_) => self.go_to(PageKey::Index(self.last_index)),
            },
            Control::Jump(name) => self.go_to(PageKey::Named(name)),
            Control::Toggle(name) => {
                if self.current == PageKey::Named(name.clone()) {
                    self.go_to(PageKey::Index(self.last_index))
                } else {
                    self.go_to(PageKey::Named(name))
                }
            }
        }
    }
}
