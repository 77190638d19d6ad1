//! Style roles expressed as an enum + macro mapping logical names to `colored::Color`.
//!
//! Each logical style (Header, a job state, ...) is a variant of `StyleRole`.
//! Coloring is applied only when the `enabled` flag passed to `paint()` is
//! true, so there is no global color state.
//!
//! ```
//! use jobqueue::core::styles::StyleRole;
//! let plain = StyleRole::Failed.paint("failed", false);
//! assert_eq!(plain, "failed");
//! let colored = StyleRole::Failed.paint("failed", true);
//! assert!(colored.starts_with("\x1b["));
//! ```

use crate::queue::job::JobState;
use clap::builder::styling::AnsiColor;
use colored::Color;

macro_rules! style {
    ( $( $variant:ident => $color:expr ),+ $(,)? ) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq)]
        pub enum StyleRole { $( $variant ),+ }

        impl StyleRole {
            pub fn color(self) -> Option<Color> {
                match self { $( StyleRole::$variant => $color ),+ }
            }

            /// SGR foreground parameter, e.g. `"33"`
            pub fn ansi_code(self) -> Option<String> {
                self.color().map(|c| c.to_fg_str().into_owned())
            }

            pub fn paint(self, text: &str, enabled: bool) -> String {
                if !enabled { return text.to_string(); }
                if let Some(code) = self.ansi_code() { return format!("\x1b[{}m{}\x1b[0m", code, text); }
                text.to_string()
            }

            /// prettytable style_spec for this role, `None` when uncoloured
            pub fn to_prettytable_spec(self) -> Option<String> {
                let spec_char = match self.color()? {
                    Color::Black => "k",
                    Color::Red => "r",
                    Color::Green => "g",
                    Color::Yellow => "y",
                    Color::Blue => "b",
                    Color::Magenta => "m",
                    Color::Cyan => "c",
                    Color::White => "w",
                    Color::BrightBlack => "K",
                    Color::BrightRed => "R",
                    Color::BrightGreen => "G",
                    Color::BrightYellow => "Y",
                    Color::BrightBlue => "B",
                    Color::BrightMagenta => "M",
                    Color::BrightCyan => "C",
                    Color::BrightWhite => "W",
                    _ => return None,
                };
                Some(format!("F{}", spec_char))
            }
        }
    }
}

style! {
    Header      => Some(Color::Yellow),
    Literal     => Some(Color::Cyan),
    Placeholder => Some(Color::Green),
    Valid       => Some(Color::Green),
    Invalid     => Some(Color::Red),
    Error       => Some(Color::BrightRed),
    Key         => Some(Color::BrightGreen),
    Value       => None,
    Delayed     => Some(Color::Magenta),
    Waiting     => Some(Color::Cyan),
    Active      => Some(Color::Blue),
    Completed   => Some(Color::Green),
    Failed      => Some(Color::Red),
    Paused      => Some(Color::BrightYellow),
    Dim         => Some(Color::BrightBlack)
}

impl StyleRole {
    pub fn for_state(state: JobState) -> StyleRole {
        match state {
            JobState::Delayed => StyleRole::Delayed,
            JobState::Waiting => StyleRole::Waiting,
            JobState::Active => StyleRole::Active,
            JobState::Completed => StyleRole::Completed,
            JobState::Failed => StyleRole::Failed,
        }
    }
}

fn color_to_ansi(c: Color) -> Option<AnsiColor> {
    use self::AnsiColor as A;
    use Color::*;
    Some(match c {
        Black => A::Black,
        Red => A::Red,
        Green => A::Green,
        Yellow => A::Yellow,
        Blue => A::Blue,
        Magenta => A::Magenta,
        Cyan => A::Cyan,
        White => A::White,
        BrightBlack => A::BrightBlack,
        BrightRed => A::BrightRed,
        BrightGreen => A::BrightGreen,
        BrightYellow => A::BrightYellow,
        BrightBlue => A::BrightBlue,
        BrightMagenta => A::BrightMagenta,
        BrightCyan => A::BrightCyan,
        BrightWhite => A::BrightWhite,
        _ => return None,
    })
}

/// clap help styles built from the same roles
pub fn palette_to_clap(enabled: bool) -> clap::builder::Styles {
    use clap::builder::styling::{Color as ClapColor, Style};
    if !enabled {
        return clap::builder::Styles::plain();
    }

    let style = |role: StyleRole, bold: bool| {
        let mut s = Style::new();
        if let Some(col) = role.color().and_then(color_to_ansi) {
            s = s.fg_color(Some(ClapColor::Ansi(col)));
        }
        if bold {
            s = s.bold();
        }
        s
    };

    clap::builder::Styles::styled()
        .header(style(StyleRole::Header, true))
        .literal(style(StyleRole::Literal, false))
        .placeholder(style(StyleRole::Placeholder, false))
        .valid(style(StyleRole::Valid, false))
        .invalid(style(StyleRole::Invalid, false))
        .error(style(StyleRole::Error, false))
}
