//! Integration tests for the generic repository
//!
//! These tests run every repository operation against an in-memory SQLite
//! database:
//! - CRUD and patch merging
//! - Filtered, sorted and paginated listing
//! - Bulk operations and transactions
//! - Eager relation loading

mod common;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use repokit::{
    Database, Filter, FilterOperator, Patch, Predicates, QueryParams, RawQuery, RepoError,
    Repository, SortDirection, Update,
};
use repokit::orm::descriptor_of;
use serde_json::json;
use std::sync::Arc;

use common::{Author, Book, Member, Product, Profile, Slug, Tag, catalog, setup};

async fn seeded_products() -> (Database, Repository<Product>) {
    let db = setup().await;
    let products = db.repository::<Product>().unwrap();
    products.create_many(&catalog()).await.unwrap();
    (db, products)
}

fn prices(items: &[Product]) -> Vec<f64> {
    items.iter().map(|p| p.price).collect()
}

// ============================================================================
// CRUD
// ============================================================================

mod crud {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_assigns_id_and_get_reads_it_back() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();

        let created = products.create(&Product::new("Phone", 999.99)).await.unwrap();
        let id = created.id.expect("store assigns an id");

        let fetched = products.get(id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.name, "Phone");
        assert!(fetched.in_stock);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();

        let err = products.get(42).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.status_code(), 404);
        assert_matches!(err, RepoError::NotFound { entity, id: Some(id) } if entity == "Product" && id == "42");
    }

    #[tokio::test]
    async fn test_full_update_replaces_every_field() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();
        let created = products.create(&Product::new("Phone", 999.99)).await.unwrap();
        let id = created.id.unwrap();

        let replacement = Product {
            id: Some(id),
            in_stock: false,
            ..Product::new("Phone X", 1099.0)
        };
        let updated = products.update(id, Update::Full(replacement)).await.unwrap();
        assert_eq!(updated.name, "Phone X");
        assert_eq!(updated.price, 1099.0);
        assert!(!updated.in_stock);
        assert_eq!(updated.id, Some(id));
    }

    #[tokio::test]
    async fn test_patch_merges_over_stored_record() {
        let db = setup().await;
        let members = db.repository::<Member>().unwrap();
        let created = members
            .create(&Member {
                id: None,
                name: "A".into(),
                email: "e".into(),
                age: 5,
                prefs: json!({"theme": "dark", "lang": "en"}),
            })
            .await
            .unwrap();
        let id = created.id.unwrap();

        let renamed = members
            .update(id, Patch::new().set("name", "X").into())
            .await
            .unwrap();
        assert_eq!(renamed.name, "X");
        assert_eq!(renamed.email, "e");
        assert_eq!(renamed.age, 5);
        assert_eq!(renamed.prefs, json!({"theme": "dark", "lang": "en"}));

        let nested = members
            .update(id, Patch::new().set("prefs", json!({"theme": "light"})).into())
            .await
            .unwrap();
        assert_eq!(nested.prefs, json!({"theme": "light"}));
        assert_eq!(nested.name, "X");
        assert_eq!(nested.age, 5);
    }

    #[tokio::test]
    async fn test_patch_rejects_unknown_fields() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();
        let id = products.create(&Product::new("Phone", 1.0)).await.unwrap().id.unwrap();

        let err = products
            .update(id, Patch::new().set("colour", "red").into())
            .await
            .unwrap_err();
        assert_matches!(err, RepoError::UnknownField(f) if f == "Product.colour");
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();

        let err = products
            .update(7, Patch::new().set("name", "x").into())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();
        let id = products.create(&Product::new("Phone", 1.0)).await.unwrap().id.unwrap();

        products.delete(id).await.unwrap();
        assert!(products.get(id).await.unwrap_err().is_not_found());
        assert!(products.delete(id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_text_id_accepted_for_integer_key() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();
        let id = products.create(&Product::new("Phone", 1.0)).await.unwrap().id.unwrap();

        let fetched = products.get(id.to_string()).await.unwrap();
        assert_eq!(fetched.id, Some(id));
    }

    #[tokio::test]
    async fn test_text_key_must_be_supplied() {
        let db = setup().await;
        let slugs = db.repository::<Slug>().unwrap();

        let err = slugs
            .create(&Slug { code: None, label: "orphan".into() })
            .await
            .unwrap_err();
        assert_matches!(err, RepoError::Storage(_));
        assert_eq!(slugs.count(&slugs.options()).await.unwrap(), 0);

        let created = slugs
            .create(&Slug { code: Some("intro".into()), label: "Intro".into() })
            .await
            .unwrap();
        assert_eq!(slugs.get("intro").await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_file_database_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("repo.db").display());

        let id = {
            let db = Database::connect(&url, 2).await.unwrap();
            db.sync::<Product>().await.unwrap();
            let products = db.repository::<Product>().unwrap();
            products.create(&Product::new("Phone", 10.0)).await.unwrap().id.unwrap()
        };

        let db = Database::connect(&url, 2).await.unwrap();
        let report = db.sync::<Product>().await.unwrap();
        assert!(report.tables_created.is_empty());
        let products = db.repository::<Product>().unwrap();
        assert_eq!(products.get(id).await.unwrap().name, "Phone");
    }
}

// ============================================================================
// Listing
// ============================================================================

mod listing {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_price_scenario() {
        let (_db, products) = seeded_products().await;

        let params = QueryParams::parse(
            "filters[0][field]=price&filters[0][operator]=gte&filters[0][value]=500\
             &sort=price&order=desc&page=1&per_page=2",
        );
        let page = products.list(&products.compile(&params)).await.unwrap();

        assert_eq!(prices(&page.items), vec![1499.99, 999.99]);
        assert_eq!(page.total, 3);
        assert_eq!(page.page, 1);
        assert_eq!(page.per_page, 2);
        assert_eq!(page.total_pages(), 2);
        assert!(page.has_next_page());

        let second = products
            .list(&products.compile(&params).with_page(2))
            .await
            .unwrap();
        assert_eq!(prices(&second.items), vec![799.99]);
        assert!(!second.has_next_page());
    }

    #[tokio::test]
    async fn test_count_matches_unpaginated_list() {
        let (_db, products) = seeded_products().await;

        let queries = [
            "",
            "price_gte=500",
            "price_lt=800&in_stock=true",
            "name_operator=contains&name=a",
            "q=ph",
            "price_between=500,1000&sort=name",
            "in_stock=false",
        ];
        for query in queries {
            let options = products.compile(&QueryParams::parse(query)).with_per_page(1);
            let count = products.count(&options).await.unwrap();
            let all = products.list(&options.clone().without_pagination()).await.unwrap();
            let paged = products.list(&options).await.unwrap();

            assert_eq!(count, all.items.len() as u64, "query: {query}");
            assert_eq!(paged.total, count, "query: {query}");
        }
    }

    #[tokio::test]
    async fn test_disabled_pagination_returns_everything() {
        let (_db, products) = seeded_products().await;

        let page = products
            .list(&products.compile(&QueryParams::parse("pagination=false&per_page=1")))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.page, 1);
        assert_eq!(page.per_page, 5);
        assert_eq!(page.total_pages(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_filters_are_anded() {
        let (_db, products) = seeded_products().await;

        let params = QueryParams::parse("price_gte=500&price_lte=1000");
        let page = products.list(&products.compile(&params)).await.unwrap();
        let mut found = prices(&page.items);
        found.sort_by(f64::total_cmp);
        assert_eq!(found, vec![599.99, 799.99, 999.99]);
    }

    #[tokio::test]
    async fn test_search_and_case_sensitive_operators() {
        let (_db, products) = seeded_products().await;

        let names = |page: repokit::Page<Product>| -> Vec<String> {
            page.items.into_iter().map(|p| p.name).collect()
        };

        let search = products.list(&products.compile(&QueryParams::parse("q=PHO"))).await.unwrap();
        assert_eq!(names(search), vec!["Phone".to_string()]);

        let insensitive = products
            .list(&products.compile(&QueryParams::parse("name_startswith=la")))
            .await
            .unwrap();
        assert_eq!(names(insensitive), vec!["Laptop".to_string()]);

        let sensitive = products
            .list(&products.compile(&QueryParams::parse("name_startswiths=la")))
            .await
            .unwrap();
        assert!(sensitive.items.is_empty());
    }

    #[tokio::test]
    async fn test_case_folding_is_ascii_only() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();
        products.create(&Product::new("Émile chair", 1.0)).await.unwrap();
        products.create(&Product::new("ÄPFEL box", 1.0)).await.unwrap();

        let total = |query: &'static str| {
            let products = products.clone();
            async move {
                products
                    .count(&products.compile(&QueryParams::parse(query)))
                    .await
                    .unwrap()
            }
        };

        assert_eq!(total("q=CHAIR").await, 1);
        assert_eq!(total("q=%C3%89mile").await, 1);
        assert_eq!(total("q=%C3%A9mile").await, 0);
        assert_eq!(total("name_contains=%C3%84PFEL").await, 1);
        assert_eq!(total("name_contains=%C3%A4pfel").await, 0);
    }

    #[tokio::test]
    async fn test_like_wildcards_match_literally() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();
        products.create(&Product::new("100% cotton", 1.0)).await.unwrap();
        products.create(&Product::new("1000 cotton", 1.0)).await.unwrap();

        let page = products
            .list(&products.compile(&QueryParams::parse("name_contains=100%25")))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].name, "100% cotton");
    }

    #[tokio::test]
    async fn test_malformed_params_degrade_to_defaults() {
        let (_db, products) = seeded_products().await;

        let params = QueryParams::parse(
            "page=-3&per_page=abc&price_gte=cheap&colour=red&sort=colour&filters[0][field]=price",
        );
        let page = products.list(&products.compile(&params)).await.unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.per_page, 10);
        assert_eq!(page.total, 5);
    }

    #[tokio::test]
    async fn test_programmatic_options() {
        let (_db, products) = seeded_products().await;

        let options = products
            .options()
            .with_filter(Filter::parse("price", FilterOperator::In, "299.99,1499.99").unwrap())
            .with_sort(vec![repokit::SortSpec {
                field: "price".into(),
                direction: SortDirection::Asc,
            }]);
        let page = products.list(&options).await.unwrap();
        assert_eq!(prices(&page.items), vec![299.99, 1499.99]);
    }
}

// ============================================================================
// Lookups
// ============================================================================

mod lookups {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_find_one_and_all_by() {
        let (_db, products) = seeded_products().await;

        let watch = products
            .find_one_by(&Predicates::new().eq("name", "Watch"))
            .await
            .unwrap();
        assert_eq!(watch.price, 599.99);

        let in_stock = products
            .find_all_by(&Predicates::new().eq("in_stock", true))
            .await
            .unwrap();
        assert_eq!(in_stock.len(), 4);

        let unowned = products
            .find_all_by(&Predicates::new().is_null("user_id"))
            .await
            .unwrap();
        assert_eq!(unowned.len(), 5);

        let err = products
            .find_one_by(&Predicates::new().eq("name", "Toaster"))
            .await
            .unwrap_err();
        assert_matches!(err, RepoError::NotFound { id: None, .. });
    }

    #[tokio::test]
    async fn test_find_by_unknown_field() {
        let (_db, products) = seeded_products().await;

        let err = products
            .find_all_by(&Predicates::new().eq("colour", "red"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_matches!(err, RepoError::UnknownField(f) if f == "Product.colour");
    }

    #[tokio::test]
    async fn test_raw_query() {
        let (_db, products) = seeded_products().await;

        let raw = RawQuery::new("price > ? AND in_stock = ?")
            .bind(500.0)
            .bind(true)
            .order_by("price", SortDirection::Desc)
            .limit(2);
        let found = products.query(&raw).await.unwrap();
        assert_eq!(prices(&found), vec![1499.99, 999.99]);

        let err = products
            .query(&RawQuery::new("1 = 1").order_by("colour", SortDirection::Asc))
            .await
            .unwrap_err();
        assert_matches!(err, RepoError::UnknownField(_));
    }

    #[tokio::test]
    async fn test_records_from_value() {
        let decoded = Repository::<Product>::records_from_value(json!([
            {"id": null, "name": "Phone", "price": 1.5, "in_stock": true, "user_id": null}
        ]))
        .unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, "Phone");

        assert_matches!(
            Repository::<Product>::records_from_value(json!({"name": "Phone"})),
            Err(RepoError::InvalidType(_))
        );
    }
}

// ============================================================================
// Bulk operations and transactions
// ============================================================================

mod bulk {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_many_is_all_or_nothing() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();

        let clash = vec![
            Product { id: Some(1), ..Product::new("A", 1.0) },
            Product { id: Some(1), ..Product::new("B", 2.0) },
        ];
        let err = products.create_many(&clash).await.unwrap_err();
        assert_matches!(err, RepoError::Storage(_));
        assert_eq!(products.count(&products.options()).await.unwrap(), 0);

        let created = products.create_many(&catalog()).await.unwrap();
        assert_eq!(created.len(), 5);
        assert!(created.iter().all(|p| p.id.is_some()));
    }

    #[tokio::test]
    async fn test_update_many_with_missing_id_changes_nothing() {
        let (_db, products) = seeded_products().await;
        let ids: Vec<i64> = products
            .list(&products.options().without_pagination())
            .await
            .unwrap()
            .items
            .iter()
            .filter_map(|p| p.id)
            .collect();

        let err = products
            .update_many([ids[0], 999], Patch::new().set("in_stock", false))
            .await
            .unwrap_err();
        assert_matches!(err, RepoError::NotFound { id: Some(id), .. } if id == "999");
        assert!(products.get(ids[0]).await.unwrap().in_stock);

        let affected = products
            .update_many(ids.iter().copied(), Patch::new().set("in_stock", false))
            .await
            .unwrap();
        assert_eq!(affected, 5);
        let in_stock = products
            .find_all_by(&Predicates::new().eq("in_stock", true))
            .await
            .unwrap();
        assert!(in_stock.is_empty());
    }

    #[tokio::test]
    async fn test_delete_many() {
        let (_db, products) = seeded_products().await;
        let ids: Vec<i64> = products
            .list(&products.options().without_pagination())
            .await
            .unwrap()
            .items
            .iter()
            .filter_map(|p| p.id)
            .collect();

        assert!(products.delete_many([ids[0], 999]).await.unwrap_err().is_not_found());
        assert_eq!(products.count(&products.options()).await.unwrap(), 5);

        assert_eq!(products.delete_many([ids[0], ids[1]]).await.unwrap(), 2);
        assert_eq!(products.count(&products.options()).await.unwrap(), 3);
        assert_eq!(products.delete_many(Vec::<i64>::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_with_transaction_rolls_back_on_error() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();

        let result: repokit::Result<()> = products
            .with_transaction(|tx| async move {
                tx.create(&Product::new("Phone", 1.0)).await?;
                tx.create_many(&catalog()).await?;
                Err(RepoError::InvalidType("abort".into()))
            })
            .await;
        assert_matches!(result, Err(RepoError::InvalidType(_)));
        assert_eq!(products.count(&products.options()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_with_transaction_commits_on_success() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();

        let id = products
            .with_transaction(|tx| async move {
                let created = tx.create(&Product::new("Phone", 1.0)).await?;
                let id = created.id.unwrap_or_default();
                tx.update(id, Patch::new().set("price", 2.0).into()).await?;
                Ok(id)
            })
            .await
            .unwrap();
        assert_eq!(products.get(id).await.unwrap().price, 2.0);
    }

    #[tokio::test]
    async fn test_failed_bulk_inside_transaction_leaves_no_partial_rows() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();

        products
            .with_transaction(|tx| async move {
                tx.create(&Product::new("Kept", 5.0)).await?;
                let clash = vec![
                    Product { id: Some(100), ..Product::new("A", 1.0) },
                    Product { id: Some(100), ..Product::new("B", 2.0) },
                ];
                let err = tx.create_many(&clash).await.unwrap_err();
                assert_matches!(err, RepoError::Storage(_));
                Ok(())
            })
            .await
            .unwrap();

        let all = products
            .list(&products.options().without_pagination())
            .await
            .unwrap();
        assert_eq!(all.total, 1);
        assert_eq!(all.items[0].name, "Kept");
    }

    #[tokio::test]
    async fn test_cancelled_transaction_rolls_back() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();

        let work = products.with_transaction(|tx| async move {
            tx.create(&Product::new("Phone", 1.0)).await?;
            std::future::pending::<()>().await;
            Ok(())
        });
        let elapsed = tokio::time::timeout(std::time::Duration::from_millis(50), work).await;
        assert!(elapsed.is_err());

        assert_eq!(products.count(&products.options()).await.unwrap(), 0);
        products.create(&Product::new("Tablet", 2.0)).await.unwrap();
        assert_eq!(products.count(&products.options()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_escaped_transaction_handle_is_closed() {
        let db = setup().await;
        let products = db.repository::<Product>().unwrap();

        let escaped = products
            .with_transaction(|tx| async move { Ok(tx) })
            .await
            .unwrap();
        let err = escaped.create(&Product::new("Phone", 1.0)).await.unwrap_err();
        assert_matches!(err, RepoError::TransactionClosed);
    }
}

// ============================================================================
// Relations
// ============================================================================

mod relations {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Library {
        db: Database,
        tolkien: i64,
        hobbit: i64,
    }

    async fn library() -> Library {
        let db = setup().await;
        let authors = db.repository::<Author>().unwrap();
        let books = db.repository::<Book>().unwrap();
        let tags = db.repository::<Tag>().unwrap();

        let author = |name: &str| Author {
            id: None,
            name: name.into(),
            books: Vec::new(),
            profile: None,
        };
        let tolkien = authors.create(&author("Tolkien")).await.unwrap().id.unwrap();
        let austen = authors.create(&author("Austen")).await.unwrap().id.unwrap();

        db.repository::<Profile>()
            .unwrap()
            .create(&Profile {
                id: None,
                bio: "Philologist".into(),
                author_id: Some(tolkien),
            })
            .await
            .unwrap();

        let hobbit = books.create(&Book::new("The Hobbit", Some(tolkien))).await.unwrap();
        books.create(&Book::new("Silmarillion", Some(tolkien))).await.unwrap();
        books.create(&Book::new("Emma", Some(austen))).await.unwrap();
        books.create(&Book::new("Anonymous", None)).await.unwrap();
        let hobbit = hobbit.id.unwrap();

        let fantasy = tags.create(&Tag { id: None, label: "fantasy".into() }).await.unwrap();
        let classic = tags.create(&Tag { id: None, label: "classic".into() }).await.unwrap();
        for tag in [fantasy.id.unwrap(), classic.id.unwrap()] {
            sqlx::query("INSERT INTO book_tags (book_id, tag_id) VALUES (?, ?)")
                .bind(hobbit)
                .bind(tag)
                .execute(db.pool())
                .await
                .unwrap();
        }

        Library { db, tolkien, hobbit }
    }

    #[tokio::test]
    async fn test_default_many_to_one_is_always_loaded() {
        let lib = library().await;
        let books = lib.db.repository::<Book>().unwrap();

        let hobbit = books.get(lib.hobbit).await.unwrap();
        assert_eq!(hobbit.author.map(|a| a.name), Some("Tolkien".to_string()));
        assert!(hobbit.tags.is_empty());

        let page = books.list(&books.options()).await.unwrap();
        let authors: Vec<Option<String>> = page
            .items
            .into_iter()
            .map(|b| b.author.map(|a| a.name))
            .collect();
        // default sort is by title
        assert_eq!(
            authors,
            vec![
                None,
                Some("Austen".to_string()),
                Some("Tolkien".to_string()),
                Some("Tolkien".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_many_to_many_through_join_table() {
        let lib = library().await;
        let books = lib.db.repository::<Book>().unwrap();

        let hobbit = books.get_with_relations(lib.hobbit, &["tags"]).await.unwrap();
        let labels: Vec<String> = hobbit.tags.into_iter().map(|t| t.label).collect();
        assert_eq!(labels, vec!["classic".to_string(), "fantasy".to_string()]);
    }

    #[tokio::test]
    async fn test_one_to_many_and_one_to_one() {
        let lib = library().await;
        let authors = lib
            .db
            .repository::<Author>()
            .unwrap()
            .with_relations(&["books", "profile"]);

        let tolkien = authors.get(lib.tolkien).await.unwrap();
        let titles: Vec<String> = tolkien.books.iter().map(|b| b.title.clone()).collect();
        assert_eq!(titles, vec!["Silmarillion".to_string(), "The Hobbit".to_string()]);
        assert_eq!(tolkien.profile.map(|p| p.bio), Some("Philologist".to_string()));

        let page = authors.list(&authors.options()).await.unwrap();
        let austen = &page.items[0];
        assert_eq!(austen.name, "Austen");
        assert_eq!(austen.books.len(), 1);
        assert_eq!(austen.profile, None);
    }

    #[tokio::test]
    async fn test_descriptors_are_shared() {
        let db = setup().await;
        let books = db.repository::<Book>().unwrap();
        let again = db.repository::<Book>().unwrap();
        assert!(Arc::ptr_eq(books.descriptor(), again.descriptor()));

        let authors = db.repository::<Author>().unwrap();
        let relation = books.descriptor().relation("author").unwrap();
        let target = (relation.target)().unwrap();
        assert!(Arc::ptr_eq(&target, authors.descriptor()));
        assert!(Arc::ptr_eq(&target, &descriptor_of::<Author>().unwrap()));
    }

    #[tokio::test]
    async fn test_unknown_relation_is_configuration_error() {
        let lib = library().await;
        let books = lib.db.repository::<Book>().unwrap();

        let err = books.get_with_relations(lib.hobbit, &["reviews"]).await.unwrap_err();
        assert_matches!(err, RepoError::Configuration(msg) if msg.contains("reviews"));
    }
}
