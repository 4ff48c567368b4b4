use time::{Duration, OffsetDateTime};

/// Page-level events the guard cares about. Front ends translate their native
/// events into these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BrowserEvent {
    BeforeUnload,
    Unload,
    VisibilityHidden,
    VisibilityVisible,
    WindowBlur,
    WindowFocus,
    PopState,
    ContextMenu,
    SelectStart { in_input: bool },
    KeyDown(KeyCombo),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct KeyCombo {
    pub(crate) key: String,
    pub(crate) ctrl: bool,
    pub(crate) shift: bool,
    pub(crate) alt: bool,
    pub(crate) meta: bool,
}

impl KeyCombo {
    /// Parses `ctrl+shift+i` style descriptions. The key is lowercased.
    pub(crate) fn parse(value: &str) -> Option<Self> {
        let mut combo = Self::default();
        for part in value.split('+').map(str::trim).filter(|part| !part.is_empty()) {
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => combo.ctrl = true,
                "shift" => combo.shift = true,
                "alt" | "option" => combo.alt = true,
                "meta" | "cmd" | "command" | "super" => combo.meta = true,
                key => combo.key = key.to_string(),
            }
        }
        if combo.key.is_empty() {
            return None;
        }
        Some(combo)
    }

    fn primary(&self) -> bool {
        self.ctrl || self.meta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisconnectReason {
    BeforeUnload,
    Unload,
    HiddenTooLong,
    CloseShortcut,
}

impl DisconnectReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::BeforeUnload => "beforeunload",
            Self::Unload => "unload",
            Self::HiddenTooLong => "visibility-hidden",
            Self::CloseShortcut => "close-shortcut",
        }
    }

    /// Whether the page is about to go away, so only a beacon can be trusted.
    pub(crate) fn page_is_closing(self) -> bool {
        !matches!(self, Self::HiddenTooLong)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SuppressKind {
    Navigation,
    Refresh,
    DevTools,
    ContextMenu,
    Selection,
}

impl SuppressKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Refresh => "refresh",
            Self::DevTools => "devtools",
            Self::ContextMenu => "context-menu",
            Self::Selection => "selection",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuardVerdict {
    Allow,
    Suppress(SuppressKind),
    Disconnect(DisconnectReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GuardStats {
    pub(crate) tab_switches: u32,
    pub(crate) suppressed_shortcuts: u32,
    pub(crate) vetoed_navigations: u32,
    pub(crate) blocked_context_menus: u32,
}

/// Classifies page events while a session is running and holds the one-shot
/// auto-submit latch.
#[derive(Debug, Clone)]
pub(crate) struct NavigationGuard {
    armed: bool,
    latched: bool,
    hidden_since: Option<OffsetDateTime>,
    hidden_threshold: Duration,
    stats: GuardStats,
}

impl NavigationGuard {
    pub(crate) fn new(hidden_threshold: Duration) -> Self {
        Self {
            armed: true,
            latched: false,
            hidden_since: None,
            hidden_threshold,
            stats: GuardStats::default(),
        }
    }

    pub(crate) fn inspect(&mut self, event: &BrowserEvent, now: OffsetDateTime) -> GuardVerdict {
        if !self.armed {
            return GuardVerdict::Allow;
        }

        match event {
            BrowserEvent::BeforeUnload => GuardVerdict::Disconnect(DisconnectReason::BeforeUnload),
            BrowserEvent::Unload => GuardVerdict::Disconnect(DisconnectReason::Unload),
            BrowserEvent::VisibilityHidden => {
                if self.hidden_since.is_none() {
                    self.hidden_since = Some(now);
                    self.stats.tab_switches += 1;
                }
                GuardVerdict::Allow
            }
            BrowserEvent::VisibilityVisible => {
                // Background timers may have been throttled; re-check on return.
                let overdue = self.hidden_too_long(now);
                self.hidden_since = None;
                if overdue {
                    GuardVerdict::Disconnect(DisconnectReason::HiddenTooLong)
                } else {
                    GuardVerdict::Allow
                }
            }
            BrowserEvent::WindowBlur | BrowserEvent::WindowFocus => GuardVerdict::Allow,
            BrowserEvent::PopState => {
                self.stats.vetoed_navigations += 1;
                GuardVerdict::Suppress(SuppressKind::Navigation)
            }
            BrowserEvent::ContextMenu => {
                self.stats.blocked_context_menus += 1;
                GuardVerdict::Suppress(SuppressKind::ContextMenu)
            }
            BrowserEvent::SelectStart { in_input: true } => GuardVerdict::Allow,
            BrowserEvent::SelectStart { in_input: false } => {
                GuardVerdict::Suppress(SuppressKind::Selection)
            }
            BrowserEvent::KeyDown(combo) => {
                let verdict = classify_key(combo);
                if matches!(verdict, GuardVerdict::Suppress(_)) {
                    self.stats.suppressed_shortcuts += 1;
                }
                verdict
            }
        }
    }

    /// Checked every tick: reports a sustained hidden page.
    pub(crate) fn poll(&self, now: OffsetDateTime) -> Option<DisconnectReason> {
        if self.armed && self.hidden_too_long(now) {
            Some(DisconnectReason::HiddenTooLong)
        } else {
            None
        }
    }

    /// Takes the auto-submit latch. Only the first caller gets `true`.
    pub(crate) fn try_latch(&mut self) -> bool {
        if self.latched {
            return false;
        }
        self.latched = true;
        true
    }

    /// Reopens the latch after an auto submission failed. The hidden clock
    /// restarts so the same absence is not reported twice.
    pub(crate) fn release_latch(&mut self) {
        self.latched = false;
        self.hidden_since = None;
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
        self.hidden_since = None;
    }

    pub(crate) fn stats(&self) -> GuardStats {
        self.stats
    }

    fn hidden_too_long(&self, now: OffsetDateTime) -> bool {
        self.hidden_since.is_some_and(|since| now - since > self.hidden_threshold)
    }
}

fn classify_key(combo: &KeyCombo) -> GuardVerdict {
    let key = combo.key.as_str();

    let closes_window = (combo.primary() && matches!(key, "w" | "q"))
        || (combo.alt && key == "f4");
    if closes_window {
        return GuardVerdict::Disconnect(DisconnectReason::CloseShortcut);
    }

    let refresh = key == "f5" || (combo.primary() && key == "r");
    if refresh {
        return GuardVerdict::Suppress(SuppressKind::Refresh);
    }

    let devtools = key == "f12"
        || (combo.ctrl && combo.shift && matches!(key, "i" | "j" | "c"))
        || (combo.meta && combo.alt && matches!(key, "i" | "j" | "c"))
        || (combo.primary() && key == "u");
    if devtools {
        return GuardVerdict::Suppress(SuppressKind::DevTools);
    }

    let history = (combo.alt && matches!(key, "arrowleft" | "arrowright" | "left" | "right"))
        || (combo.meta && matches!(key, "[" | "]"));
    if history {
        return GuardVerdict::Suppress(SuppressKind::Navigation);
    }

    GuardVerdict::Allow
}
