use std::fmt::Write;

use jiff::{Zoned, tz::TimeZone};
use log::{Level, Record};
use logforth::{
    append::Stdout,
    diagnostic::Diagnostic,
    layout::{JsonLayout, Layout},
};

use crate::args::{Args, LogStyle};

/// One line per record: UTC timestamp, padded level, module target and message.
#[derive(Debug, Clone, Copy)]
struct TextLayout {
    colored: bool,
}

impl TextLayout {
    fn level(&self, level: Level) -> String {
        if !self.colored {
            return format!("{level:>5}");
        }

        let color = match level {
            Level::Error => 31,
            Level::Warn => 33,
            Level::Info => 32,
            Level::Debug => 34,
            Level::Trace => 35,
        };

        format!("\x1b[{color}m{level:>5}\x1b[0m")
    }
}

impl Layout for TextLayout {
    fn format(&self, record: &Record<'_>, _: &[Box<dyn Diagnostic>]) -> anyhow::Result<Vec<u8>> {
        let now = Zoned::now().with_time_zone(TimeZone::UTC);
        let mut line = String::new();

        write!(
            line,
            "{} {}  {}: {}",
            now.strftime("%Y-%m-%dT%H:%M:%S%.6fZ"),
            self.level(record.level()),
            record.target(),
            record.args()
        )?;

        Ok(line.into_bytes())
    }
}

pub(super) fn init(args: &Args) {
    logforth::builder()
        .dispatch(|d| {
            let d = d.filter(args.log_level.env_filter());

            match args.log_style {
                LogStyle::Color => d.append(Stdout::default().with_layout(TextLayout { colored: true })),
                LogStyle::Text => d.append(Stdout::default().with_layout(TextLayout { colored: false })),
                LogStyle::Json => d.append(Stdout::default().with_layout(JsonLayout::default())),
            }
        })
        .apply();
}
