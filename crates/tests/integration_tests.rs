//! Integration tests for RowGate
//!
//! These tests drive the gate through the in-memory client the way
//! application code does: a blog with users and posts owned via `authorId`.

use futures::StreamExt;
use rstest::rstest;
use serde_json::{json, Value as JsonValue};

use rowgate::demo::{blog_gate, blog_policy, blog_store};
use rowgate_common::{ErrorKind, GateConfig, MissingTablePolicy, Operation, RowGateError};
use rowgate_core::{Gate, PolicySet, PolicyTable, TablePolicy};
use rowgate_memory::prelude::*;
use rowgate_memory::{Db, DbError, Store};

/// Blog store with users 1 and 2 and no posts
async fn blog() -> (Store, Gate<String, MemoryAdapter>) {
    let store = blog_store().expect("Failed to create store");
    let gate = blog_gate(&store, GateConfig::default()).expect("Failed to build gate");
    gate.system()
        .insert_into("User")
        .values(json!([
            { "id": "1", "email": "one@example.com" },
            { "id": "2", "email": "two@example.com" },
        ]))
        .execute()
        .await
        .expect("Failed to seed users");
    (store, gate)
}

/// Blog store with posts 1 and 3 by user 1 and post 2 by user 2
async fn blog_with_posts() -> (Store, Gate<String, MemoryAdapter>) {
    let (store, gate) = blog().await;
    gate.system()
        .insert_into("Post")
        .values(json!([
            { "id": "1", "title": "first", "authorId": "1" },
            { "id": "2", "title": "second", "authorId": "2" },
            { "id": "3", "title": "third", "authorId": "1" },
        ]))
        .execute()
        .await
        .expect("Failed to seed posts");
    (store, gate)
}

fn post(id: &str, author: &str) -> JsonValue {
    json!({ "id": id, "title": format!("post {id}"), "authorId": author })
}

fn ids(rows: &[JsonValue]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get("id").and_then(JsonValue::as_str))
        .map(str::to_string)
        .collect()
}

/// Every post id in the store, bypassing the gate
async fn stored_post_ids(gate: &Gate<String, MemoryAdapter>) -> Vec<String> {
    let rows = gate
        .ungated()
        .select_from("Post")
        .select(&["Post.id"])
        .order_by("Post.id", Order::Asc)
        .execute()
        .await
        .expect("Failed to read posts");
    ids(&rows)
}

fn is_check_failure(err: &DbError) -> bool {
    matches!(err.gate(), Some(RowGateError::PolicyCheckFailed { .. }))
}

// ============================================================================
// Gate Facade Tests
// ============================================================================

#[tokio::test]
async fn test_concrete_example() {
    let (_store, gate) = blog().await;
    let db = gate.gated("1").await.unwrap();

    db.insert_into("Post")
        .unwrap()
        .values(json!({ "id": "1", "authorId": "1" }))
        .execute()
        .await
        .unwrap();

    let err = db
        .insert_into("Post")
        .unwrap()
        .values(json!({ "id": "2", "authorId": "2" }))
        .execute()
        .await
        .unwrap_err();
    assert!(is_check_failure(&err));

    let rows = db.select_from("Post").unwrap().select_all().execute().await.unwrap();
    assert_eq!(rows, vec![json!({ "id": "1", "authorId": "1" })]);
}

#[tokio::test]
async fn test_invalid_context_rejected() {
    let (_store, gate) = blog().await;
    let err = gate.gated(json!({ "tid": "123" })).await.unwrap_err();
    assert_eq!(err.code(), "ROWGATE_CONTEXT_ERROR");
    assert!(matches!(err, RowGateError::ContextValidation { ref issues } if !issues.is_empty()));
}

#[tokio::test]
async fn test_ungated_handles_are_unfiltered_and_identical() {
    let (_store, gate) = blog_with_posts().await;
    let first = gate.ungated().select_from("Post").execute().await.unwrap();
    let second = gate.system().select_from("Post").execute().await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_missing_policy_entry_fails_at_gated() {
    let store = blog_store().unwrap();
    store.create_table("Comment", Some("id")).unwrap();
    let gate = blog_gate(&store, GateConfig::default()).unwrap();

    match gate.gated("1").await.unwrap_err() {
        RowGateError::PolicyConfiguration { tables, message } => {
            assert_eq!(tables, vec!["Comment"]);
            assert!(message.contains("Gate(memory)"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_policy_set_coverage_checked_at_build() {
    let store = blog_store().unwrap();
    let result = Gate::<String, MemoryAdapter>::builder(MemoryAdapter::new(&store))
        .policy(PolicySet::new().table("Post", |_ctx: &String| TablePolicy::new()))
        .build();
    assert!(matches!(
        result,
        Err(RowGateError::PolicyConfiguration { ref tables, .. }) if tables == &vec!["User".to_string()]
    ));
}

#[rstest]
#[case(MissingTablePolicy::Deny, false)]
#[case(MissingTablePolicy::Allow, true)]
#[tokio::test]
async fn test_table_without_policy_entry(#[case] missing_table: MissingTablePolicy, #[case] visible: bool) {
    let store = blog_store().unwrap();
    store.create_table("Comment", Some("id")).unwrap();
    let config = GateConfig {
        missing_table,
        require_full_coverage: false,
        ..GateConfig::default()
    };
    let gate = blog_gate(&store, config).unwrap();
    gate.system()
        .insert_into("Comment")
        .values(json!({ "id": "c1" }))
        .execute()
        .await
        .unwrap();

    let db = gate.gated("1").await.unwrap();
    match db.select_from("Comment") {
        Ok(query) => {
            assert!(visible);
            assert_eq!(query.execute().await.unwrap().len(), 1);
        }
        Err(err) => {
            assert!(!visible);
            assert_eq!(err.code(), "ROWGATE_POLICY_CONFIG_ERROR");
        }
    }
}

// ============================================================================
// Read / Join Tests
// ============================================================================

#[rstest]
#[case("1", vec!["1", "3"])]
#[case("2", vec!["2"])]
#[case("3", vec![])]
#[tokio::test]
async fn test_reads_only_see_own_rows(#[case] user: &str, #[case] expected: Vec<&str>) {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated(user).await.unwrap();
    let rows = db
        .select_from("Post")
        .unwrap()
        .select(&["Post.id"])
        .order_by("Post.id", Order::Asc)
        .execute()
        .await
        .unwrap();
    assert_eq!(ids(&rows), expected);
}

#[tokio::test]
async fn test_alias_receives_filter() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("2").await.unwrap();
    let rows = db
        .select_from("Post as p")
        .unwrap()
        .select(&["p.id", "p.title as heading"])
        .execute()
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({ "id": "2", "heading": "second" })]);
}

#[tokio::test]
async fn test_join_restricts_joined_table() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("1").await.unwrap();
    let rows = db
        .select_from("User")
        .unwrap()
        .inner_join("Post as p", "p.authorId", "User.id")
        .unwrap()
        .select(&["User.email", "p.id"])
        .order_by("p.id", Order::Asc)
        .execute()
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![
            json!({ "email": "one@example.com", "id": "1" }),
            json!({ "email": "one@example.com", "id": "3" }),
        ]
    );

    // Post is filtered even when joined to an unrestricted cross product
    let rows = db
        .select_from("User")
        .unwrap()
        .cross_join("Post")
        .unwrap()
        .select(&["Post.authorId"])
        .execute()
        .await
        .unwrap();
    assert!(rows.iter().all(|row| row["authorId"] == "1"));
}

#[tokio::test]
async fn test_self_join_filters_every_copy() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("2").await.unwrap();

    let err = db
        .select_from("Post")
        .unwrap()
        .cross_join("Post")
        .unwrap()
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicateTableName(ref name) if name == "Post"));

    let err = db
        .select_from_tables(&["Post", "Post"])
        .unwrap()
        .execute()
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MEMORY_DUPLICATE_OBJECT");

    let rows = db
        .select_from("Post as a")
        .unwrap()
        .cross_join("Post as b")
        .unwrap()
        .select(&["a.id as left_id", "b.id as right_id"])
        .execute()
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({ "left_id": "2", "right_id": "2" })]);
}

#[tokio::test]
async fn test_terminal_variants() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("2").await.unwrap();

    let first = db.select_from("Post").unwrap().execute_take_first().await.unwrap();
    assert_eq!(first.as_ref().and_then(|row| row.get("id")), Some(&json!("2")));

    let err = db
        .select_from("Post")
        .unwrap()
        .and_where(col("Post.id").eq("1"))
        .unwrap()
        .execute_take_first_or_throw()
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NoResult));

    let streamed: Vec<_> = db
        .select_from("Post")
        .unwrap()
        .stream()
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(streamed.len(), 1);
    assert!(streamed.iter().all(Result::is_ok));
}

// ============================================================================
// Composite Construct Tests
// ============================================================================

#[tokio::test]
async fn test_scalar_subquery_is_filtered() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("1").await.unwrap();
    let rows = db
        .select_from("User")
        .unwrap()
        .select(&["User.id"])
        .select_with(|eb| {
            Ok(eb
                .select_from("Post")?
                .select(&["Post.title"])
                .order_by("Post.id", Order::Desc)
                .limit(1)
                .as_("latest"))
        })
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({ "id": "1", "latest": "third" })]);
}

#[tokio::test]
async fn test_json_helpers_are_allowed_and_gated() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("1").await.unwrap();
    let rows = db
        .select_from("User")
        .unwrap()
        .select(&["User.id"])
        .select_with(|eb| {
            let posts = eb
                .select_from("Post")?
                .select(&["Post.id"])
                .order_by("Post.id", Order::Asc);
            Ok(eb.json_array_from(posts)?.as_("posts"))
        })
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![json!({ "id": "1", "posts": [{ "id": "1" }, { "id": "3" }] })]
    );
}

#[tokio::test]
async fn test_correlated_exists_is_gated() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("2").await.unwrap();
    let rows = db
        .select_from("User as u")
        .unwrap()
        .where_with(|eb| {
            let posts = eb
                .select_from("Post")?
                .where_with(|inner| inner.expr(col("Post.authorId").eq_col("u.id")))?;
            eb.exists(posts)
        })
        .unwrap()
        .select(&["u.id"])
        .execute()
        .await
        .unwrap();
    assert_eq!(ids(&rows), vec!["2"]);
}

#[tokio::test]
async fn test_cte_body_is_gated() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("1").await.unwrap();
    let rows = db
        .with("mine", |db| Ok(db.select_from("Post")?.select_all()))
        .unwrap()
        .select_from("mine")
        .unwrap()
        .select(&["mine.id"])
        .order_by("mine.id", Order::Asc)
        .execute()
        .await
        .unwrap();
    assert_eq!(ids(&rows), vec!["1", "3"]);
}

#[rstest]
#[case("Post")]
#[case("User")]
#[case("Post(id, authorId)")]
#[tokio::test]
async fn test_cte_cannot_shadow_a_table(#[case] name: &str) {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("2").await.unwrap();
    let err = db
        .with(name, |d| Ok(d.select_from("Post")?.select_all()))
        .unwrap_err();
    assert_eq!(err.code(), "ROWGATE_NOT_SUPPORTED_ERROR");
}

#[tokio::test]
async fn test_writes_never_resolve_to_a_cte() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("2").await.unwrap();
    let with_cte = db
        .with("mine", |d| Ok(d.select_from("Post")?.select_all()))
        .unwrap();

    let err = with_cte.update_table("mine").unwrap_err();
    assert_eq!(err.code(), "ROWGATE_POLICY_CONFIG_ERROR");
    let err = with_cte.delete_from("mine").unwrap_err();
    assert_eq!(err.code(), "ROWGATE_POLICY_CONFIG_ERROR");
    let err = with_cte.insert_into("mine").unwrap_err();
    assert_eq!(err.code(), "ROWGATE_POLICY_CONFIG_ERROR");

    // the real table stays filtered and checked on the same handle
    let updated = with_cte
        .update_table("Post")
        .unwrap()
        .set(json!({ "title": "hijacked", "authorId": "2" }))
        .execute()
        .await
        .unwrap();
    assert_eq!(updated.rows_affected, 1);

    let deleted = with_cte.delete_from("Post").unwrap().execute().await.unwrap();
    assert_eq!(deleted.rows_affected, 1);

    let err = with_cte
        .insert_into("Post")
        .unwrap()
        .values(json!({ "id": "9", "authorId": "1" }))
        .execute()
        .await
        .unwrap_err();
    assert!(is_check_failure(&err));

    assert_eq!(stored_post_ids(&gate).await, vec!["1", "3"]);
    let titles = gate
        .ungated()
        .select_from("Post")
        .select(&["Post.title"])
        .order_by("Post.id", Order::Asc)
        .execute()
        .await
        .unwrap();
    assert_eq!(titles, vec![json!({ "title": "first" }), json!({ "title": "third" })]);
}

#[tokio::test]
async fn test_with_schema_keeps_gating() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("2").await.unwrap();
    let rows = db
        .with_schema("public")
        .select_from("Post")
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(ids(&rows), vec!["2"]);

    let err = db
        .with_schema("archive")
        .select_from("Post")
        .unwrap()
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::UnknownSchema(_)));
}

// ============================================================================
// Raw Expression Tests
// ============================================================================

#[tokio::test]
async fn test_raw_expressions_rejected_while_gated() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("1").await.unwrap();

    let err = db
        .select_from("Post")
        .unwrap()
        .select_as(raw("now()", |_| json!("now")), "at")
        .unwrap_err();
    assert_eq!(err.code(), "ROWGATE_NOT_SUPPORTED_ERROR");

    let err = db
        .select_from("Post")
        .unwrap()
        .where_with(|eb| eb.expr(raw("true", |_| json!(true))))
        .unwrap_err();
    assert_eq!(err.code(), "ROWGATE_NOT_SUPPORTED_ERROR");

    // the same raw expression is fine on the ungated handle
    let rows = gate
        .ungated()
        .select_from("Post")
        .select_as(raw("now()", |_| json!("now")), "at")
        .execute()
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn test_insert_escapes_rejected_under_insert_check() {
    let (_store, gate) = blog().await;
    let db = gate.gated("1").await.unwrap();

    let err = db.insert_into("Post").unwrap().columns(&["id", "authorId"]).unwrap_err();
    assert_eq!(err.code(), "ROWGATE_NOT_SUPPORTED_ERROR");

    let err = db
        .insert_into("Post")
        .unwrap()
        .expression(|eb| eb.select_from("User"))
        .unwrap_err();
    assert_eq!(err.code(), "ROWGATE_NOT_SUPPORTED_ERROR");
    assert!(err.to_string().contains("ungated"));

    // the ungated handle still supports both
    let raw_db = gate.ungated();
    raw_db
        .insert_into("Post")
        .columns(&["id", "authorId"])
        .expression(
            raw_db
                .select_from("User")
                .and_where(col("User.id").eq("2"))
                .select_as(val("10"), "id")
                .select_as(col("User.id"), "authorId"),
        )
        .execute()
        .await
        .unwrap();
    assert_eq!(stored_post_ids(&gate).await, vec!["10"]);
}

// ============================================================================
// Mutation Tests
// ============================================================================

#[tokio::test]
async fn test_batch_insert_checks_every_row() {
    let (_store, gate) = blog().await;
    let db = gate.gated("1").await.unwrap();
    let err = db
        .insert_into("Post")
        .unwrap()
        .values(json!([post("1", "1"), post("2", "2")]))
        .execute()
        .await
        .unwrap_err();
    assert!(is_check_failure(&err));
    assert!(stored_post_ids(&gate).await.is_empty());

    db.insert_into("Post")
        .unwrap()
        .values(json!([post("1", "1"), post("2", "1")]))
        .execute()
        .await
        .unwrap();
    assert_eq!(stored_post_ids(&gate).await, vec!["1", "2"]);
}

#[tokio::test]
async fn test_update_only_touches_visible_rows() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("2").await.unwrap();

    let result = db
        .update_table("Post")
        .unwrap()
        .set(json!({ "title": "hijacked" }))
        .and_where(col("Post.id").eq("1"))
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(result.rows_affected, 0);

    let result = db
        .update_table("Post as p")
        .unwrap()
        .set(json!({ "title": "edited" }))
        .execute()
        .await
        .unwrap();
    assert_eq!(result.rows_affected, 1);

    let titles = gate
        .ungated()
        .select_from("Post")
        .select(&["Post.title"])
        .order_by("Post.id", Order::Asc)
        .execute()
        .await
        .unwrap();
    assert_eq!(
        titles,
        vec![json!({ "title": "first" }), json!({ "title": "edited" }), json!({ "title": "third" })]
    );
}

#[tokio::test]
async fn test_update_check_rejects_new_values() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("1").await.unwrap();

    let err = db
        .update_table("Post")
        .unwrap()
        .set(json!({ "authorId": "2" }))
        .and_where(col("Post.id").eq("1"))
        .unwrap()
        .execute()
        .await
        .unwrap_err();

    match err.gate() {
        Some(RowGateError::PolicyCheckFailed {
            table,
            operation,
            mismatches,
            ..
        }) => {
            assert_eq!(table, "Post");
            assert_eq!(*operation, Operation::Update);
            assert_eq!(mismatches.len(), 1);
            assert_eq!(mismatches[0].field, "authorId");
            assert_eq!(mismatches[0].expected, json!("1"));
            assert_eq!(mismatches[0].actual, json!("2"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let visible = db.select_from("Post").unwrap().execute().await.unwrap();
    assert_eq!(ids(&visible), vec!["1", "3"]);
}

#[tokio::test]
async fn test_delete_only_touches_visible_rows() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("2").await.unwrap();

    let result = db.delete_from("Post").unwrap().execute().await.unwrap();
    assert_eq!(result.rows_affected, 1);
    assert_eq!(stored_post_ids(&gate).await, vec!["1", "3"]);
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let (_store, gate) = blog().await;
    let one = gate.gated("1").await.unwrap();
    let two = gate.gated("2").await.unwrap();

    let bad = one.insert_into("Post").unwrap().values(post("9", "2"));
    let (good, forged) = tokio::join!(
        two.insert_into("Post").unwrap().values(post("2", "2")).execute(),
        bad.execute(),
    );
    assert!(good.is_ok());
    assert!(is_check_failure(&forged.unwrap_err()));
    assert_eq!(stored_post_ids(&gate).await, vec!["2"]);
}

// ============================================================================
// Transaction Tests
// ============================================================================

#[tokio::test]
async fn test_transaction_commits_allowed_rows() {
    let (_store, gate) = blog().await;
    let db = gate.gated("1").await.unwrap();

    db.transaction()
        .execute(|trx| async move {
            trx.insert_into("Post")?.values(post("1", "1")).execute().await?;
            Ok::<_, DbError>(())
        })
        .await
        .unwrap();
    assert_eq!(stored_post_ids(&gate).await, vec!["1"]);
}

#[tokio::test]
async fn test_rejected_insert_propagates_and_rolls_back() {
    let (_store, gate) = blog().await;
    let db = gate.gated("1").await.unwrap();

    let err = db
        .transaction()
        .execute(|trx| async move {
            trx.insert_into("Post")?.values(post("1", "1")).execute().await?;
            trx.insert_into("Post")?.values(post("2", "2")).execute().await?;
            Ok::<_, DbError>(())
        })
        .await
        .unwrap_err();
    assert!(is_check_failure(&err));
    assert!(stored_post_ids(&gate).await.is_empty());
}

#[tokio::test]
async fn test_caught_rejection_keeps_allowed_row() {
    let (_store, gate) = blog().await;
    let db = gate.gated("1").await.unwrap();

    let rejected = db
        .transaction()
        .execute(|trx| async move {
            trx.insert_into("Post")?.values(post("1", "1")).execute().await?;
            let forged = trx.insert_into("Post")?.values(post("2", "2")).execute().await;
            Ok::<_, DbError>(forged.err().map(|e| e.code()))
        })
        .await
        .unwrap();
    assert_eq!(rejected, Some("ROWGATE_POLICY_ERROR"));
    assert_eq!(stored_post_ids(&gate).await, vec!["1"]);
}

#[tokio::test]
async fn test_client_error_rolls_back() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("1").await.unwrap();

    let err = db
        .transaction()
        .execute(|trx| async move {
            trx.insert_into("Post")?.values(post("4", "1")).execute().await?;
            trx.insert_into("Post")?.values(post("1", "1")).execute().await?;
            Ok::<_, DbError>(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey { .. }));
    assert_eq!(err.kind(), ErrorKind::Adapter);
    assert!(!err.is_denial());
    assert_eq!(stored_post_ids(&gate).await, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_reads_inside_transaction_see_uncommitted_rows_filtered() {
    let (_store, gate) = blog_with_posts().await;
    let db = gate.gated("2").await.unwrap();

    let visible = db
        .transaction()
        .execute(|trx| async move {
            trx.insert_into("Post")?.values(post("4", "2")).execute().await?;
            let rows = trx
                .select_from("Post")?
                .select(&["Post.id"])
                .order_by("Post.id", Order::Asc)
                .execute()
                .await?;
            Ok::<_, DbError>(ids(&rows))
        })
        .await
        .unwrap();
    assert_eq!(visible, vec!["2", "4"]);
}

#[tokio::test]
async fn test_outer_checks_drain_before_transaction() {
    let (_store, gate) = blog().await;
    let db = gate.gated("1").await.unwrap();
    let _forged = db.insert_into("Post").unwrap().values(post("1", "2"));

    let err = db
        .transaction()
        .execute(|_trx| async { Ok::<_, DbError>(()) })
        .await
        .unwrap_err();
    assert!(is_check_failure(&err));
}

fn author_must_exist() -> PolicyTable<MemoryAdapter> {
    PolicyTable::new().table("User", TablePolicy::new()).table(
        "Post",
        TablePolicy::new().insert_check(|db: Db, row: JsonValue| async move {
            let author = row.get("authorId").cloned().unwrap_or(JsonValue::Null);
            let found = db
                .select_from("User")
                .and_where(col("User.id").eq(author))
                .execute_take_first()
                .await?;
            Ok::<_, DbError>(found.is_some())
        }),
    )
}

#[tokio::test]
async fn test_checks_inside_transaction_use_transaction_client() {
    let store = blog_store().unwrap();
    let gate = Gate::<String, MemoryAdapter>::builder(MemoryAdapter::new(&store))
        .policy(|_user: &String| author_must_exist())
        .build()
        .unwrap();
    let db = gate.gated("1").await.unwrap();

    db.transaction()
        .execute(|trx| async move {
            trx.insert_into("User")?.values(json!({ "id": "7" })).execute().await?;
            trx.insert_into("Post")?.values(post("1", "7")).execute().await?;
            Ok::<_, DbError>(())
        })
        .await
        .unwrap();
    assert_eq!(stored_post_ids(&gate).await, vec!["1"]);

    // outside the transaction the author has to exist already
    let err = db
        .insert_into("Post")
        .unwrap()
        .values(post("2", "8"))
        .execute()
        .await
        .unwrap_err();
    assert!(is_check_failure(&err));
}

#[tokio::test]
async fn test_manual_commit_and_rollback() {
    let (_store, gate) = blog().await;
    let db = gate.gated("1").await.unwrap();

    let trx = db.start_transaction().execute().await.unwrap();
    trx.insert_into("Post").unwrap().values(post("1", "1")).execute().await.unwrap();
    assert!(stored_post_ids(&gate).await.is_empty());
    trx.commit().execute().await.unwrap();
    assert_eq!(stored_post_ids(&gate).await, vec!["1"]);

    let trx = db.start_transaction().execute().await.unwrap();
    trx.insert_into("Post").unwrap().values(post("2", "1")).execute().await.unwrap();
    trx.rollback().execute().await.unwrap();
    assert_eq!(stored_post_ids(&gate).await, vec!["1"]);
}

#[tokio::test]
async fn test_commit_drains_pending_checks_and_rollback_discards_them() {
    let (_store, gate) = blog().await;
    let db = gate.gated("1").await.unwrap();

    let trx = db.start_transaction().execute().await.unwrap();
    let _forged = trx.insert_into("Post").unwrap().values(post("1", "2"));
    let err = trx.commit().execute().await.unwrap_err();
    assert!(is_check_failure(&err));

    // the transaction is still open; abandoning it skips whatever is queued
    let _forged = trx.insert_into("Post").unwrap().values(post("2", "2"));
    trx.rollback().execute().await.unwrap();
    assert!(stored_post_ids(&gate).await.is_empty());
}

#[tokio::test]
async fn test_savepoint_rollback_keeps_earlier_rows() {
    let (_store, gate) = blog().await;
    let db = gate.gated("1").await.unwrap();

    let trx = db.start_transaction().execute().await.unwrap();
    trx.insert_into("Post").unwrap().values(post("1", "1")).execute().await.unwrap();

    let sp = trx.savepoint("sp1").execute().await.unwrap();
    let err = sp
        .insert_into("Post")
        .unwrap()
        .values(post("2", "2"))
        .execute()
        .await
        .unwrap_err();
    assert!(is_check_failure(&err));

    let trx = sp.rollback_to_savepoint("sp1").execute().await.unwrap();
    trx.commit().execute().await.unwrap();
    assert_eq!(stored_post_ids(&gate).await, vec!["1"]);
}

#[tokio::test]
async fn test_multiple_savepoints() {
    let (_store, gate) = blog().await;
    let db = gate.gated("1").await.unwrap();

    let trx = db.start_transaction().execute().await.unwrap();
    trx.insert_into("Post").unwrap().values(post("1", "1")).execute().await.unwrap();

    let sp1 = trx.savepoint("sp1").execute().await.unwrap();
    sp1.insert_into("Post").unwrap().values(post("2", "1")).execute().await.unwrap();

    let sp2 = sp1.savepoint("sp2").execute().await.unwrap();
    sp2.insert_into("Post").unwrap().values(post("3", "1")).execute().await.unwrap();
    let visible = sp2.select_from("Post").unwrap().execute().await.unwrap();
    assert_eq!(visible.len(), 3);

    let back = sp2.rollback_to_savepoint("sp2").execute().await.unwrap();
    let visible = back.select_from("Post").unwrap().execute().await.unwrap();
    assert_eq!(ids(&visible), vec!["1", "2"]);

    let released = back.release_savepoint("sp1").execute().await.unwrap();
    let err = released.rollback_to_savepoint("sp1").execute().await.unwrap_err();
    assert!(matches!(err, DbError::SavepointNotFound(_)));

    released.commit().execute().await.unwrap();
    assert_eq!(stored_post_ids(&gate).await, vec!["1", "2"]);
}

#[test]
fn test_blog_policy_declares_both_tables() {
    let policy = blog_policy("1");
    assert!(policy.contains("Post"));
    assert!(policy.contains("User"));
    assert_eq!(policy.table_names(), vec!["Post", "User"]);
}
