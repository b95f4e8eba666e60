//! Interactive article selection over a loaded result set.
//!
//! Filters, sort and pagination only shape the view. The selection is kept
//! either as an explicit id set or as "everything except" a set of
//! exclusions, so selecting all of a large result never materializes its
//! ids.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools as _;
use serde::{Deserialize, Serialize};

use crate::source::{
    self, ArticleId, GenericArticle, SourceRegistry,
    query::OrderDirection,
    stats::FilterOptions,
};

pub mod filter;
pub mod preset;

pub use filter::{ArticleFilters, SortSpec, WordCountRange};
pub use preset::{FilterPreset, PresetStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Explicit(BTreeSet<ArticleId>),
    AllExcept(BTreeSet<ArticleId>),
}

impl Default for Selection {
    fn default() -> Self {
        Self::Explicit(BTreeSet::new())
    }
}

impl Selection {
    pub fn contains(&self, id: &ArticleId) -> bool {
        match self {
            Self::Explicit(ids) => ids.contains(id),
            Self::AllExcept(excluded) => !excluded.contains(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    Explicit,
    AllExcept,
}

/// Portable form of a selection and the view it was made in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionExport {
    pub mode: SelectionMode,
    pub ids: Vec<ArticleId>,
    #[serde(default)]
    pub filters: ArticleFilters,
    #[serde(default)]
    pub sort: SortSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectionStatistics {
    pub total: usize,
    pub filtered: usize,
    pub selected: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_language: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
}

const DEFAULT_PAGE_SIZE: usize = 50;

pub struct SelectionManager {
    articles: Vec<GenericArticle>,
    /// Indices into `articles`, filtered and sorted.
    view: Vec<usize>,
    selection: Selection,
    filters: ArticleFilters,
    sort: SortSpec,
    page: usize,
    page_size: usize,
}

impl Default for SelectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionManager {
    pub fn new() -> Self {
        Self {
            articles: Vec::new(),
            view: Vec::new(),
            selection: Selection::default(),
            filters: ArticleFilters::default(),
            sort: SortSpec::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Replace the loaded set. The selection is kept.
    pub fn load(&mut self, articles: Vec<GenericArticle>) {
        self.articles = articles;
        self.refresh();
    }

    /// Load from a source profile, pushing the SQL-capable filters down.
    pub async fn load_from(
        &mut self,
        registry: &SourceRegistry,
        profile: &str,
        site_id: Option<ArticleId>,
        language: Option<String>,
    ) -> Result<usize, source::Error> {
        let query = source::ArticleQuery {
            site_id,
            language,
            ..self.filters.to_query(&self.sort)
        };
        let articles = registry.query(profile, &query).await?;
        let count = articles.len();
        self.load(articles);
        Ok(count)
    }

    fn refresh(&mut self) {
        let mut view = self
            .articles
            .iter()
            .enumerate()
            .filter(|(_, article)| self.filters.matches(article))
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        view.sort_by(|&a, &b| self.sort.compare(&self.articles[a], &self.articles[b]));
        self.view = view;
    }

    pub fn articles(&self) -> &[GenericArticle] {
        &self.articles
    }

    pub fn filtered_articles(&self) -> impl Iterator<Item = &GenericArticle> {
        self.view.iter().map(|&index| &self.articles[index])
    }

    pub fn filters(&self) -> &ArticleFilters {
        &self.filters
    }

    pub fn set_filters(&mut self, filters: ArticleFilters) {
        self.filters = filters;
        self.page = 1;
        self.refresh();
    }

    pub fn clear_filters(&mut self) {
        self.set_filters(ArticleFilters::default());
    }

    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    /// Sort by `field`; keeps the current direction when `direction` is
    /// `None`.
    pub fn set_sort(&mut self, field: impl Into<String>, direction: Option<OrderDirection>) {
        self.sort.field = field.into();
        if let Some(direction) = direction {
            self.sort.direction = direction;
        }
        self.refresh();
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn select(&mut self, id: ArticleId) {
        match &mut self.selection {
            Selection::Explicit(ids) => {
                ids.insert(id);
            }
            Selection::AllExcept(excluded) => {
                excluded.remove(&id);
            }
        }
    }

    pub fn deselect(&mut self, id: ArticleId) {
        match &mut self.selection {
            Selection::Explicit(ids) => {
                ids.remove(&id);
            }
            Selection::AllExcept(excluded) => {
                excluded.insert(id);
            }
        }
    }

    pub fn toggle(&mut self, id: ArticleId) {
        if self.is_selected(&id) {
            self.deselect(id);
        } else {
            self.select(id);
        }
    }

    pub fn select_all(&mut self) {
        self.selection = Selection::AllExcept(BTreeSet::new());
    }

    pub fn deselect_all(&mut self) {
        self.selection = Selection::default();
    }

    /// Select every filtered article matching `predicate`.
    pub fn select_filtered(&mut self, predicate: impl Fn(&GenericArticle) -> bool) {
        let ids = self
            .filtered_articles()
            .filter(|article| predicate(article))
            .map(|article| article.id.clone())
            .collect::<Vec<_>>();
        for id in ids {
            self.select(id);
        }
    }

    pub fn is_selected(&self, id: &ArticleId) -> bool {
        self.selection.contains(id)
    }

    /// Selected articles in view order.
    pub fn selected_articles(&self) -> Vec<&GenericArticle> {
        self.filtered_articles()
            .filter(|article| self.is_selected(&article.id))
            .collect()
    }

    pub fn selected_count(&self) -> usize {
        match &self.selection {
            Selection::Explicit(ids) => ids.len(),
            Selection::AllExcept(_) => self.selected_articles().len(),
        }
    }

    /// Clamped to at least 1.
    pub fn set_page(&mut self, page: usize) {
        self.page = page.max(1);
    }

    /// Also returns to the first page.
    pub fn set_page_size(&mut self, size: usize) {
        self.page_size = size.max(1);
        self.page = 1;
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn current_page_articles(&self) -> Vec<&GenericArticle> {
        self.filtered_articles()
            .skip((self.page - 1) * self.page_size)
            .take(self.page_size)
            .collect()
    }

    pub fn total_pages(&self) -> usize {
        self.view.len().div_ceil(self.page_size)
    }

    /// Distinct values present in the loaded set.
    pub fn available_filters(&self) -> FilterOptions {
        fn distinct<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Vec<String> {
            values
                .flatten()
                .filter(|value| !value.is_empty())
                .map(String::from)
                .sorted()
                .dedup()
                .collect()
        }
        FilterOptions {
            categories: distinct(self.articles.iter().map(|a| a.category.as_deref())),
            authors: distinct(self.articles.iter().map(|a| a.author.as_deref())),
            languages: distinct(self.articles.iter().map(|a| Some(a.language.as_str()))),
            statuses: distinct(self.articles.iter().map(|a| a.status.as_deref())),
        }
    }

    pub fn statistics(&self) -> SelectionStatistics {
        let mut stats = SelectionStatistics {
            total: self.articles.len(),
            filtered: self.view.len(),
            selected: self.selected_count(),
            ..Default::default()
        };
        let bump = |counts: &mut BTreeMap<String, usize>, value: Option<&str>| {
            if let Some(value) = value.filter(|value| !value.is_empty()) {
                *counts.entry(value.to_string()).or_default() += 1;
            }
        };
        for article in self.filtered_articles() {
            bump(&mut stats.by_category, article.category.as_deref());
            bump(&mut stats.by_language, Some(&article.language));
            bump(&mut stats.by_status, article.status.as_deref());
        }
        stats
    }

    pub fn export_selection(&self) -> SelectionExport {
        let (mode, ids) = match &self.selection {
            Selection::Explicit(ids) => (SelectionMode::Explicit, ids),
            Selection::AllExcept(excluded) => (SelectionMode::AllExcept, excluded),
        };
        SelectionExport {
            mode,
            ids: ids.iter().cloned().collect(),
            filters: self.filters.clone(),
            sort: self.sort.clone(),
        }
    }

    pub fn import_selection(&mut self, export: SelectionExport) {
        let ids = export.ids.into_iter().collect();
        self.selection = match export.mode {
            SelectionMode::Explicit => Selection::Explicit(ids),
            SelectionMode::AllExcept => Selection::AllExcept(ids),
        };
        self.filters = export.filters;
        self.sort = export.sort;
        self.page = 1;
        self.refresh();
    }

    /// Replace the filters with a preset's.
    pub fn apply_preset(&mut self, preset: &FilterPreset) {
        self.set_filters(preset.filters.clone());
    }
}
