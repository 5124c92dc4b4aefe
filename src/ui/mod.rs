//! Terminal rendering for the CLI: colours, icons, tables and progress bars

pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{error, header, info, section, success, summary_row, warn};
pub use progress::{StatusProgress, Spinner};
pub use table::{outcomes_table, stats_table, sweep_table, versions_table};
pub use theme::{theme, Theme};
