use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::source::{
    GenericArticle,
    query::{ArticleQuery, DateRange, OrderDirection},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCountRange {
    #[serde(default)]
    pub min: Option<usize>,
    #[serde(default)]
    pub max: Option<usize>,
}

/// Client-side filters over a loaded article set. Unset filters match
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArticleFilters {
    /// Case-insensitive substring of title, description or content.
    pub search: Option<String>,
    pub categories: Vec<String>,
    pub authors: Vec<String>,
    pub languages: Vec<String>,
    pub statuses: Vec<String>,
    /// Applied to `created_at`.
    pub date_range: Option<DateRange>,
    pub has_images: Option<bool>,
    pub word_count: Option<WordCountRange>,
    pub has_seo: Option<bool>,
}

fn member(values: &[String], value: Option<&str>) -> bool {
    values.is_empty() || value.is_some_and(|value| values.iter().any(|v| v == value))
}

impl ArticleFilters {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn matches(&self, article: &GenericArticle) -> bool {
        if let Some(needle) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let needle = needle.to_lowercase();
            let found = [
                Some(article.title.as_str()),
                article.meta_description.as_deref(),
                Some(article.content.as_str()),
            ]
            .into_iter()
            .flatten()
            .any(|haystack| haystack.to_lowercase().contains(&needle));
            if !found {
                return false;
            }
        }
        if !member(&self.categories, article.category.as_deref())
            || !member(&self.authors, article.author.as_deref())
            || !member(&self.languages, Some(&article.language))
            || !member(&self.statuses, article.status.as_deref())
        {
            return false;
        }
        if let Some(range) = &self.date_range {
            let Some(created_at) = article.created_at else {
                return false;
            };
            if range.from.is_some_and(|from| created_at < from)
                || range.to.is_some_and(|to| created_at > to)
            {
                return false;
            }
        }
        if self.has_images.is_some_and(|wanted| article.has_images() != wanted) {
            return false;
        }
        if let Some(range) = self.word_count {
            let words = article.word_count();
            if range.min.is_some_and(|min| words < min) || range.max.is_some_and(|max| words > max)
            {
                return false;
            }
        }
        if self.has_seo.is_some_and(|wanted| article.has_seo() != wanted) {
            return false;
        }
        true
    }

    /// The part of the filters the source can evaluate in SQL.
    pub fn to_query(&self, sort: &SortSpec) -> ArticleQuery {
        ArticleQuery {
            search: self.search.clone(),
            categories: self.categories.clone(),
            authors: self.authors.clone(),
            statuses: self.statuses.clone(),
            date_range: self.date_range.clone(),
            has_images: self.has_images,
            order_by: Some(sort.field.clone()),
            order_direction: sort.direction,
            ..Default::default()
        }
    }
}

fn default_sort_field() -> String {
    "created_at".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Generic field name or passthrough column.
    #[serde(default = "default_sort_field")]
    pub field: String,
    #[serde(default)]
    pub direction: OrderDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            field: default_sort_field(),
            direction: OrderDirection::Desc,
        }
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) | Value::Object(_) => 3,
        Value::Null => 4,
    }
}

/// Integers compare exactly; anything else goes through `f64`.
fn compare_numbers(a: &Number, b: &Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    match a.as_f64().zip(b.as_f64()) {
        Some((x, y)) => x
            .total_cmp(&y)
            .then_with(|| a.to_string().cmp(&b.to_string())),
        None => a.to_string().cmp(&b.to_string()),
    }
}

/// Ascending order of two present values. Strings compare case-folded
/// first, then raw.
fn compare_present(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => a
            .to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => rank(a)
            .cmp(&rank(b))
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

impl SortSpec {
    /// Nulls (and empty strings) sort last in both directions.
    pub fn compare(&self, a: &GenericArticle, b: &GenericArticle) -> Ordering {
        let missing = |value: &Value| match value {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        };
        let (a, b) = (a.field(&self.field), b.field(&self.field));
        match (missing(&a), missing(&b)) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let order = compare_present(&a, &b);
                match self.direction {
                    OrderDirection::Asc => order,
                    OrderDirection::Desc => order.reverse(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn article(value: Value) -> GenericArticle {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn filters_combine() {
        let seo = article(json!({
            "id": 1,
            "language": "ja",
            "title": "Driver review",
            "content": "one two three ![x](https://x/1.png)",
            "meta_description": "desc",
            "keywords": "driver",
            "category": "gear",
            "created_at": "2024-03-01 00:00:00",
        }));
        let bare = article(json!({"id": 2, "language": "en", "title": "Putting", "content": "one"}));

        let filters = ArticleFilters {
            has_seo: Some(true),
            ..Default::default()
        };
        assert!(filters.matches(&seo) && !filters.matches(&bare));

        let filters = ArticleFilters {
            word_count: Some(WordCountRange {
                min: Some(2),
                max: Some(4),
            }),
            ..Default::default()
        };
        assert!(filters.matches(&seo) && !filters.matches(&bare));

        let filters = ArticleFilters {
            search: Some("DRIVER".into()),
            categories: vec!["gear".into()],
            has_images: Some(true),
            ..Default::default()
        };
        assert!(filters.matches(&seo) && !filters.matches(&bare));

        let filters = ArticleFilters {
            date_range: Some(DateRange {
                from: "2024-01-01T00:00:00Z".parse().ok(),
                to: None,
            }),
            ..Default::default()
        };
        assert!(filters.matches(&seo));
        assert!(!filters.matches(&bare), "no date never matches a range");
        assert!(ArticleFilters::default().matches(&bare));
    }

    #[test]
    fn nulls_sort_last_both_ways() {
        let a = article(json!({"id": 1, "title": "apple", "category": "b"}));
        let b = article(json!({"id": 2, "title": "Banana"}));
        let c = article(json!({"id": 3, "title": "cherry", "category": "a"}));
        let mut articles = vec![b.clone(), c.clone(), a.clone()];

        let mut sort = SortSpec {
            field: "category".into(),
            direction: OrderDirection::Asc,
        };
        articles.sort_by(|x, y| sort.compare(x, y));
        assert_eq!(articles, vec![c.clone(), a.clone(), b.clone()]);

        sort.direction = OrderDirection::Desc;
        articles.sort_by(|x, y| sort.compare(x, y));
        assert_eq!(articles, vec![a.clone(), c.clone(), b.clone()]);

        sort = SortSpec {
            field: "title".into(),
            direction: OrderDirection::Asc,
        };
        articles.sort_by(|x, y| sort.compare(x, y));
        assert_eq!(articles, vec![a, b, c]);
    }

    #[test]
    fn numbers_compare_numerically() {
        let low = article(json!({"id": 1, "views": 9}));
        let high = article(json!({"id": 2, "views": 10}));
        let sort = SortSpec {
            field: "views".into(),
            direction: OrderDirection::Asc,
        };
        assert_eq!(sort.compare(&low, &high), Ordering::Less);
    }

    #[test]
    fn large_and_mixed_numbers_keep_their_order() {
        let sort = SortSpec {
            field: "views".into(),
            direction: OrderDirection::Asc,
        };
        let pairs = [
            (json!(9_007_199_254_740_992_u64), json!(9_007_199_254_740_993_u64)),
            (json!(18_446_744_073_709_551_614_u64), json!(18_446_744_073_709_551_615_u64)),
            (json!(-1), json!(18_446_744_073_709_551_615_u64)),
            (json!(2), json!(2.5)),
            (json!(-0.5), json!(0)),
        ];
        for (low, high) in pairs {
            let (a, b) = (
                article(json!({"id": 1, "views": low})),
                article(json!({"id": 2, "views": high})),
            );
            assert_eq!(sort.compare(&a, &b), Ordering::Less, "{low} < {high}");
            assert_eq!(sort.compare(&b, &a), Ordering::Greater, "{high} > {low}");
        }
    }
}
