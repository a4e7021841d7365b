//! Shared entities and fixtures for the integration tests

#![allow(dead_code)]

use repokit::{Database, Entity};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "products", owner = "user_id")]
pub struct Product {
    pub id: Option<i64>,
    #[filterable]
    #[sortable]
    #[searchable]
    pub name: String,
    #[filterable]
    #[sortable]
    pub price: f64,
    #[filterable]
    pub in_stock: bool,
    pub user_id: Option<String>,
}

impl Product {
    pub fn new(name: &str, price: f64) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            price,
            in_stock: true,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
pub struct Member {
    pub id: Option<i64>,
    pub name: String,
    pub email: String,
    pub age: i64,
    pub prefs: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "notes", owner = "user_id", default_sort = "title")]
pub struct Note {
    pub id: Option<i64>,
    #[filterable]
    #[sortable]
    #[searchable]
    pub title: String,
    pub user_id: Option<String>,
}

impl Note {
    pub fn new(title: &str) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(default_sort = "name")]
pub struct Author {
    pub id: Option<i64>,
    #[filterable]
    pub name: String,
    #[relation(kind = "one_to_many", target = Book)]
    #[serde(default)]
    pub books: Vec<Book>,
    #[relation(kind = "one_to_one", target = Profile, local = "id", foreign = "author_id")]
    #[serde(default)]
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
pub struct Profile {
    pub id: Option<i64>,
    pub bio: String,
    pub author_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(default_sort = "title")]
pub struct Book {
    pub id: Option<i64>,
    #[filterable]
    #[sortable]
    pub title: String,
    pub author_id: Option<i64>,
    #[relation(kind = "many_to_one", target = Author, include_by_default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[relation(
        kind = "many_to_many",
        target = Tag,
        join_table = "book_tags",
        join_local = "book_id",
        join_foreign = "tag_id"
    )]
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Book {
    pub fn new(title: &str, author_id: Option<i64>) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            author_id,
            author: None,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(default_sort = "label")]
pub struct Tag {
    pub id: Option<i64>,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "slugs", id = "code")]
pub struct Slug {
    pub code: Option<String>,
    pub label: String,
}

/// In-memory database with every test entity's table in place
pub async fn setup() -> Database {
    let db = Database::in_memory().await.expect("in-memory database");
    db.sync::<Product>().await.expect("sync products");
    db.sync::<Member>().await.expect("sync members");
    db.sync::<Note>().await.expect("sync notes");
    db.sync::<Author>().await.expect("sync authors");
    db.sync::<Profile>().await.expect("sync profiles");
    db.sync::<Book>().await.expect("sync books");
    db.sync::<Tag>().await.expect("sync tags");
    db.sync::<Slug>().await.expect("sync slugs");
    db
}

/// The five products of the pricing scenario
pub fn catalog() -> Vec<Product> {
    vec![
        Product::new("Phone", 999.99),
        Product::new("Tablet", 799.99),
        Product::new("Watch", 599.99),
        Product {
            in_stock: false,
            ..Product::new("Earbuds", 299.99)
        },
        Product::new("Laptop", 1499.99),
    ]
}
