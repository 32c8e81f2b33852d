use beacon_core::events::{AttrValue, Attributes};

/// Anything the game can report. Turned into an [`beacon_core::Event`] by the
/// pipeline, which also stamps the time and normalizes names.
pub trait DomainEvent {
    fn name(&self) -> &str;
    fn attributes(&self) -> Attributes;
}

/// Built-in gameplay telemetry.
#[derive(Clone, Debug, PartialEq)]
pub enum GameEvent {
    SessionStart,
    SessionEnd {
        duration_secs: u64,
    },
    LevelStarted {
        level: u32,
    },
    LevelCompleted {
        level: u32,
        score: i64,
        duration_secs: f64,
    },
    LevelFailed {
        level: u32,
        reason: String,
    },
    ScreenViewed {
        screen: String,
    },
    SettingChanged {
        setting: String,
        value: AttrValue,
    },
    AchievementUnlocked {
        achievement: String,
    },
    PurchaseCompleted {
        product_id: String,
        price: f64,
        currency: String,
    },
}

impl DomainEvent for GameEvent {
    fn name(&self) -> &str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd { .. } => "session_end",
            Self::LevelStarted { .. } => "level_start",
            Self::LevelCompleted { .. } => "level_complete",
            Self::LevelFailed { .. } => "level_fail",
            Self::ScreenViewed { .. } => "screen_view",
            Self::SettingChanged { .. } => "setting_change",
            Self::AchievementUnlocked { .. } => "achievement_unlocked",
            Self::PurchaseCompleted { .. } => "purchase",
        }
    }

    fn attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        match self {
            Self::SessionStart => {}
            Self::SessionEnd { duration_secs } => {
                let secs = i64::try_from(*duration_secs).unwrap_or(i64::MAX);
                attrs.insert("duration_secs".into(), secs.into());
            }
            Self::LevelStarted { level } => {
                attrs.insert("level".into(), (*level).into());
            }
            Self::LevelCompleted {
                level,
                score,
                duration_secs,
            } => {
                attrs.insert("level".into(), (*level).into());
                attrs.insert("score".into(), (*score).into());
                attrs.insert("duration_secs".into(), (*duration_secs).into());
            }
            Self::LevelFailed { level, reason } => {
                attrs.insert("level".into(), (*level).into());
                attrs.insert("reason".into(), reason.as_str().into());
            }
            Self::ScreenViewed { screen } => {
                attrs.insert("screen".into(), screen.as_str().into());
            }
            Self::SettingChanged { setting, value } => {
                attrs.insert("setting".into(), setting.as_str().into());
                attrs.insert("value".into(), value.clone());
            }
            Self::AchievementUnlocked { achievement } => {
                attrs.insert("achievement".into(), achievement.as_str().into());
            }
            Self::PurchaseCompleted {
                product_id,
                price,
                currency,
            } => {
                attrs.insert("product_id".into(), product_id.as_str().into());
                attrs.insert("price".into(), (*price).into());
                attrs.insert("currency".into(), currency.as_str().into());
            }
        }
        attrs
    }
}

/// Free-form event for anything without a dedicated variant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CustomEvent {
    name: String,
    attributes: Attributes,
}

impl CustomEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl DomainEvent for CustomEvent {
    fn name(&self) -> &str {
        &self.name
    }

    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }
}
