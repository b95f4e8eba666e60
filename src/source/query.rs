use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Database, Encode, QueryBuilder, Type};

use crate::source::{
    Error,
    article::ArticleId,
    pool::Dialect,
    profile::{GenericField, SourceProfile},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

impl OrderDirection {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArticleQuery {
    #[serde(alias = "website_id")]
    pub site_id: Option<ArticleId>,
    pub language: Option<String>,
    pub categories: Vec<String>,
    pub authors: Vec<String>,
    pub statuses: Vec<String>,
    pub date_range: Option<DateRange>,
    pub search: Option<String>,
    pub has_images: Option<bool>,
    /// Generic field name; resolved through the profile's mapping.
    pub order_by: Option<String>,
    pub order_direction: OrderDirection,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn sql_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn push_in<DB>(builder: &mut QueryBuilder<'static, DB>, column: &str, values: &[String])
where
    DB: Database,
    String: for<'q> Encode<'q, DB> + Type<DB>,
{
    if values.is_empty() {
        return;
    }
    builder.push(format!(" AND {column} IN ("));
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
    separated.push_unseparated(")");
}

impl ArticleQuery {
    /// Parameterized `SELECT` for this query. Every identifier goes through
    /// the profile; values are always bound.
    pub fn build<DB>(
        &self,
        profile: &SourceProfile,
        dialect: Dialect,
    ) -> Result<QueryBuilder<'static, DB>, Error>
    where
        DB: Database,
        i64: for<'q> Encode<'q, DB> + Type<DB>,
        String: for<'q> Encode<'q, DB> + Type<DB>,
        DB::Arguments<'static>: Default,
    {
        let order_column = match &self.order_by {
            Some(name) => profile.resolve(name)?,
            None => profile.quoted(GenericField::CreatedAt)?,
        };
        let table = profile.quoted_table()?;

        let mut builder =
            QueryBuilder::new(format!("{} WHERE 1=1", dialect.select_articles(&table)));
        if let Some(site_id) = &self.site_id {
            builder.push(format!(" AND {} = ", profile.quoted(GenericField::SiteId)?));
            match site_id {
                ArticleId::Int(id) => builder.push_bind(*id),
                ArticleId::Text(id) => builder.push_bind(id.clone()),
            };
        }
        if let Some(language) = &self.language {
            builder.push(format!(" AND {} = ", profile.quoted(GenericField::Language)?));
            builder.push_bind(language.clone());
        }
        push_in(
            &mut builder,
            &profile.quoted(GenericField::Category)?,
            &self.categories,
        );
        push_in(
            &mut builder,
            &profile.quoted(GenericField::Author)?,
            &self.authors,
        );
        push_in(
            &mut builder,
            &profile.quoted(GenericField::Status)?,
            &self.statuses,
        );
        if let Some(range) = &self.date_range {
            let created = dialect.timestamp(&profile.quoted(GenericField::CreatedAt)?);
            for (bound, op) in [(&range.from, ">="), (&range.to, "<=")] {
                let Some(bound) = bound else { continue };
                let (open, close) = dialect.timestamp_wrap();
                builder.push(format!(" AND {created} {op} {open}"));
                builder.push_bind(sql_datetime(bound));
                builder.push(close);
            }
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let needle = escape_like(search.trim());
            builder.push(format!(
                " AND (LOWER({}) LIKE ",
                profile.quoted(GenericField::Title)?
            ));
            builder.push_bind(needle.clone());
            builder.push(format!(
                " ESCAPE '\\' OR LOWER({}) LIKE ",
                profile.quoted(GenericField::Content)?
            ));
            builder.push_bind(needle);
            builder.push(" ESCAPE '\\')");
        }
        if let Some(has_images) = self.has_images {
            let image = profile.quoted(GenericField::FeaturedImageUrl)?;
            if has_images {
                builder.push(format!(" AND ({image} IS NOT NULL AND {image} != '')"));
            } else {
                builder.push(format!(" AND ({image} IS NULL OR {image} = '')"));
            }
        }
        builder.push(format!(
            " ORDER BY {order_column} {}",
            self.order_direction.as_sql()
        ));
        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                builder.push(" LIMIT ");
                builder.push_bind(i64::from(limit));
                if let Some(offset) = offset {
                    builder.push(" OFFSET ");
                    builder.push_bind(i64::from(offset));
                }
            }
            (None, Some(offset)) => {
                builder.push(dialect.offset_only());
                builder.push_bind(i64::from(offset));
            }
            (None, None) => {}
        }
        Ok(builder)
    }
}
