//! Item entity and form binding for the demo application.

use serde::{Deserialize, Serialize};

use crate::error::{require, AppResult};
use crate::pipeline::RequestContext;
use crate::render::escape_html;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub release_date: String,
    pub face_auth: bool,
}

impl Item {
    /// Bind the form/query parameters of the current request, and mirror
    /// them back into request attributes so an error re-render shows what
    /// the user typed.
    pub fn from_request(ctx: &mut RequestContext) -> Self {
        let item = Self {
            id: ctx.request.param("id").and_then(|v| v.parse().ok()).unwrap_or(0),
            name: ctx.request.param("name").unwrap_or("").to_string(),
            release_date: ctx.request.param("release_date").unwrap_or("").to_string(),
            face_auth: matches!(ctx.request.param("face_auth"), Some("on") | Some("true") | Some("1")),
        };
        ctx.set_attribute("item_id", &item.id.to_string());
        ctx.set_attribute("item_name", &escape_html(&item.name));
        ctx.set_attribute("item_release_date", &escape_html(&item.release_date));
        ctx.set_attribute("item_face_auth", if item.face_auth { "checked" } else { "" });
        item
    }

    /// Input checks; each violation raises an application error routed back
    /// to the originating form.
    pub fn validate(self) -> AppResult<Self> {
        require(!self.name.trim().is_empty(), "The product name is required.")?;
        require(
            self.name.chars().count() <= 30,
            format!(
                "Enter a product name of 30 characters or less. ({} characters)",
                self.name.chars().count()
            ),
        )?;
        require(
            !self.name.contains('<') && !self.name.contains('>'),
            "The product name must not contain < or >.",
        )?;
        require(
            !(self.name.to_lowercase().contains("iphone") && !self.face_auth),
            "Enable face authentication for iPhone products.",
        )?;
        require(
            !self.release_date.ends_with("15"),
            "Enter a release date that does not fall on the 15th.",
        )?;
        Ok(self)
    }
}
