//! Live font selection that a [`TrainingRequest`](crate::request::TrainingRequest) is captured from.

use crate::supervisor::ButtonLabel;

/// Installed fonts plus the subset picked for training.
#[derive(Debug, Clone, Default)]
pub struct FontSelection {
    catalog: Vec<String>,
    selected: Vec<String>,
}

impl FontSelection {
    /// Hidden system fonts (names starting with `.`) are left out of the catalog.
    pub fn new<I, S>(available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let catalog = available
            .into_iter()
            .map(Into::into)
            .filter(|name: &String| !name.starts_with('.'))
            .collect();
        Self {
            catalog,
            selected: Vec::new(),
        }
    }

    pub fn catalog(&self) -> &[String] {
        &self.catalog
    }

    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    pub fn is_selected(&self, font: &str) -> bool {
        self.selected.iter().any(|f| f == font)
    }

    /// Mark a catalog font for training. Unknown or already selected fonts are ignored.
    pub fn select(&mut self, font: &str) -> bool {
        if self.is_selected(font) || !self.catalog.iter().any(|f| f == font) {
            return false;
        }
        self.selected.push(font.to_string());
        true
    }

    pub fn deselect(&mut self, font: &str) -> bool {
        let before = self.selected.len();
        self.selected.retain(|f| f != font);
        self.selected.len() != before
    }

    pub fn all_selected(&self) -> bool {
        !self.catalog.is_empty() && self.catalog.iter().all(|f| self.is_selected(f))
    }

    /// The "add all / remove all" button. Returns the label the button shows afterwards.
    pub fn toggle_all(&mut self) -> ButtonLabel {
        if self.all_selected() {
            self.selected.clear();
        } else {
            self.selected = self.catalog.clone();
        }
        self.fonts_button()
    }

    pub fn fonts_button(&self) -> ButtonLabel {
        if self.all_selected() {
            ButtonLabel::RemoveAllFonts
        } else {
            ButtonLabel::AddAllFonts
        }
    }

    /// Copy of the current selection, detached from later edits.
    pub fn snapshot(&self) -> Vec<String> {
        self.selected.clone()
    }
}
