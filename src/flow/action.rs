//! Correlation keys carried by selectable options.

const MENU: &str = "sell_menu";
const TOKEN_PREFIX: &str = "sell_token:";
const PERCENT_PREFIX: &str = "sell_percent:";
const CUSTOM_PREFIX: &str = "sell_custom:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SellAction {
    Menu,
    Token(String),
    Percent { mint: String, percent: u8 },
    Custom(String),
}

impl SellAction {
    /// `None` for keys that belong to some other flow or are malformed.
    pub fn parse(key: &str) -> Option<Self> {
        if key == MENU {
            return Some(SellAction::Menu);
        }
        if let Some(mint) = key.strip_prefix(TOKEN_PREFIX) {
            return non_empty(mint).map(SellAction::Token);
        }
        if let Some(mint) = key.strip_prefix(CUSTOM_PREFIX) {
            return non_empty(mint).map(SellAction::Custom);
        }
        let rest = key.strip_prefix(PERCENT_PREFIX)?;
        let (mint, percent) = rest.rsplit_once(':')?;
        let percent: u8 = percent.parse().ok()?;
        if !(1..=100).contains(&percent) {
            return None;
        }
        Some(SellAction::Percent {
            mint: non_empty(mint)?,
            percent,
        })
    }

    pub fn key(&self) -> String {
        match self {
            SellAction::Menu => MENU.to_string(),
            SellAction::Token(mint) => format!("{TOKEN_PREFIX}{mint}"),
            SellAction::Percent { mint, percent } => format!("{PERCENT_PREFIX}{mint}:{percent}"),
            SellAction::Custom(mint) => format!("{CUSTOM_PREFIX}{mint}"),
        }
    }
}

fn non_empty(mint: &str) -> Option<String> {
    let mint = mint.trim();
    if mint.is_empty() || mint.contains(':') {
        None
    } else {
        Some(mint.to_string())
    }
}
