use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tower_cookies::{
    Cookie, Cookies,
    cookie::{SameSite, time::Duration},
};
use utoipa::ToSchema;

pub const THEME_COOKIE: &str = "theme";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("unknown theme: {other}")),
        }
    }
}

/// UI theme preference of one client, persisted in a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct ThemeState {
    pub theme: Theme,
}

impl ThemeState {
    /// Reads the stored preference, unknown values fall back to the default.
    pub fn load(cookies: &Cookies) -> Self {
        let theme = cookies
            .get(THEME_COOKIE)
            .and_then(|c| c.value().parse().ok())
            .unwrap_or_default();
        Self { theme }
    }

    pub fn toggle(&mut self, cookies: &Cookies) -> Theme {
        self.theme = self.theme.toggled();
        self.save(cookies);
        self.theme
    }

    pub fn save(&self, cookies: &Cookies) {
        let cookie = Cookie::build((THEME_COOKIE, self.theme.as_str()))
            .path("/")
            .same_site(SameSite::Lax)
            .max_age(Duration::days(365))
            .build();
        cookies.add(cookie);
    }
}
