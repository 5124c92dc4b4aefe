//! Terminal styles for cache reports

use owo_colors::Style;
use std::sync::OnceLock;

static THEME: OnceLock<Theme> = OnceLock::new();

/// Styles by the role text plays in command output
#[derive(Debug, Clone)]
pub struct Theme {
    /// Command banners and section titles
    pub heading: Style,
    /// Finished operations and sweep totals
    pub done: Style,
    pub failure: Style,
    /// Dropped user data, tables from a newer release
    pub caution: Style,
    /// Icon of a `label: value` line
    pub label: Style,
    /// Labels, elapsed time and collected warnings
    pub detail: Style,
}

impl Theme {
    /// Plain styles when colours are off (`NO_COLOR`, piped output)
    pub fn new(colored: bool) -> Self {
        let pick = |style: Style| if colored { style } else { Style::new() };
        Self {
            heading: pick(Style::new().cyan().bold()),
            done: pick(Style::new().green().bold()),
            failure: pick(Style::new().red().bold()),
            caution: pick(Style::new().yellow().bold()),
            label: pick(Style::new().magenta()),
            detail: pick(Style::new().dimmed()),
        }
    }
}

pub fn theme() -> &'static Theme {
    THEME.get_or_init(|| Theme::new(console::colors_enabled()))
}
