//! Builder for inline and reply keyboards.
//!
//! Markups serialize to the Bot API JSON shape and convert into teloxide's
//! [`ReplyMarkup`] for sending.
use serde::{Deserialize, Serialize};
use teloxide::types::ReplyMarkup;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyButton {
    pub text: String,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub request_contact: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub request_location: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyKeyboard {
    pub keyboard: Vec<Vec<ReplyButton>>,
    pub resize_keyboard: bool,
    pub one_time_keyboard: bool,
}

/// A markup ready to attach to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Keyboard {
    Inline(InlineKeyboard),
    Reply(ReplyKeyboard),
}

impl Keyboard {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn to_markup(&self) -> serde_json::Result<ReplyMarkup> {
        let mut value = self.to_json();
        if let (Keyboard::Reply(_), Some(obj)) = (self, value.as_object_mut()) {
            obj.insert("is_persistent".into(), serde_json::Value::Bool(false));
        }
        serde_json::from_value(value)
    }
}

impl From<InlineKeyboard> for Keyboard {
    fn from(k: InlineKeyboard) -> Self {
        Keyboard::Inline(k)
    }
}

impl From<ReplyKeyboard> for Keyboard {
    fn from(k: ReplyKeyboard) -> Self {
        Keyboard::Reply(k)
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeyboardBuilder {
    inline_rows: Vec<Vec<InlineButton>>,
    reply_rows: Vec<Vec<ReplyButton>>,
}

impl KeyboardBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the current inline row. With neither `callback` nor `url`
    /// the button text doubles as callback data.
    pub fn add_inline_button(
        &mut self,
        text: &str,
        callback: Option<&str>,
        url: Option<&str>,
    ) -> &mut Self {
        let callback_data = match (callback, url) {
            (Some(cb), _) => Some(cb.to_string()),
            (None, Some(_)) => None,
            (None, None) => Some(text.to_string()),
        };
        let button = InlineButton {
            text: text.to_string(),
            callback_data,
            url: url.map(str::to_string),
        };
        match self.inline_rows.last_mut() {
            Some(row) => row.push(button),
            None => self.inline_rows.push(vec![button]),
        }
        self
    }

    /// Adds a full row of `(text, callback_data)` buttons.
    pub fn add_inline_row(&mut self, buttons: &[(&str, &str)]) -> &mut Self {
        let row = buttons
            .iter()
            .map(|(text, data)| InlineButton {
                text: text.to_string(),
                callback_data: Some(data.to_string()),
                url: None,
            })
            .collect();
        self.inline_rows.push(row);
        self.inline_rows.push(Vec::new());
        self
    }

    /// Starts a new inline row unless the current one is still empty.
    pub fn new_row(&mut self) -> &mut Self {
        if self.inline_rows.last().map_or(false, |r| !r.is_empty()) {
            self.inline_rows.push(Vec::new());
        }
        self
    }

    pub fn add_reply_button(
        &mut self,
        text: &str,
        request_contact: bool,
        request_location: bool,
    ) -> &mut Self {
        let button = ReplyButton {
            text: text.to_string(),
            request_contact,
            request_location,
        };
        match self.reply_rows.last_mut() {
            Some(row) => row.push(button),
            None => self.reply_rows.push(vec![button]),
        }
        self
    }

    pub fn add_reply_row(&mut self, texts: &[&str]) -> &mut Self {
        let row = texts
            .iter()
            .map(|text| ReplyButton {
                text: text.to_string(),
                request_contact: false,
                request_location: false,
            })
            .collect();
        self.reply_rows.push(row);
        self.reply_rows.push(Vec::new());
        self
    }

    pub fn new_reply_row(&mut self) -> &mut Self {
        if self.reply_rows.last().map_or(false, |r| !r.is_empty()) {
            self.reply_rows.push(Vec::new());
        }
        self
    }

    /// `None` when no inline button was added.
    pub fn build_inline(&self) -> Option<InlineKeyboard> {
        let rows: Vec<_> = self
            .inline_rows
            .iter()
            .filter(|r| !r.is_empty())
            .cloned()
            .collect();
        (!rows.is_empty()).then_some(InlineKeyboard {
            inline_keyboard: rows,
        })
    }

    pub fn build_reply(&self, resize: bool, one_time: bool) -> Option<ReplyKeyboard> {
        let rows: Vec<_> = self
            .reply_rows
            .iter()
            .filter(|r| !r.is_empty())
            .cloned()
            .collect();
        (!rows.is_empty()).then_some(ReplyKeyboard {
            keyboard: rows,
            resize_keyboard: resize,
            one_time_keyboard: one_time,
        })
    }

    pub fn clear(&mut self) -> &mut Self {
        self.inline_rows.clear();
        self.reply_rows.clear();
        self
    }
}
