//! Import articles from field-mapped sqlite content tables into a
//! Payload-style CMS as Lexical rich-text documents.

pub mod cms;
pub mod config;
pub mod linking;
pub mod media;
pub mod progress;
pub mod queue;
pub mod rich_text;
pub mod selection;
pub mod source;
pub mod warning;

#[cfg(test)]
mod tests;
