//! LOCK/UNLOCK: token issuance, enforcement against writes, refresh,
//! lock-null resources, and shared-lock coexistence.

mod common;

use common::{if_token, lock_token, Fixture};
use http::StatusCode;

#[tokio::test]
async fn test_lock_returns_token_and_discovery() {
    let f = Fixture::new();
    f.put_ok("/f", "x").await;

    let reply = f.lock("/f").await;
    assert_eq!(reply.status, StatusCode::OK);
    let token = lock_token(&reply);
    assert!(token.starts_with("urn:uuid:"), "unexpected token {token}");
    assert!(reply.body.contains("lockdiscovery"));
    assert!(reply.body.contains("<D:exclusive/>"));
    assert!(reply.body.contains(&token));
}

#[tokio::test]
async fn test_locked_file_rejects_put_without_token() {
    let f = Fixture::new();
    f.put_ok("/f", "old").await;
    let reply = f.lock("/f").await;
    let token = lock_token(&reply);

    let reply = f.send("PUT", "/f", &[], "new").await;
    assert_eq!(reply.status, StatusCode::LOCKED);

    let reply = f.send("PUT", "/f", &[("If", &if_token(&token))], "new").await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert_eq!(f.get("/f").await.body, "new");
}

#[tokio::test]
async fn test_locked_file_rejects_delete_and_proppatch() {
    let f = Fixture::new();
    f.put_ok("/f", "x").await;
    f.lock("/f").await;

    assert_eq!(f.send("DELETE", "/f", &[], "").await.status, StatusCode::LOCKED);
    let update = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:z="urn:z">
        <D:set><D:prop><z:p>v</z:p></D:prop></D:set>
    </D:propertyupdate>"#;
    assert_eq!(
        f.send("PROPPATCH", "/f", &[], update.to_string()).await.status,
        StatusCode::LOCKED
    );
}

#[tokio::test]
async fn test_second_exclusive_lock_is_423() {
    let f = Fixture::new();
    f.put_ok("/f", "x").await;
    f.lock("/f").await;
    assert_eq!(f.lock("/f").await.status, StatusCode::LOCKED);
}

#[tokio::test]
async fn test_unlock_releases() {
    let f = Fixture::new();
    f.put_ok("/f", "x").await;
    let token = lock_token(&f.lock("/f").await);

    let reply = f
        .send("UNLOCK", "/f", &[("Lock-Token", &format!("<{token}>"))], "")
        .await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    // Lock is gone: writes and new locks succeed.
    assert_eq!(f.send("PUT", "/f", &[], "y").await.status, StatusCode::NO_CONTENT);
    assert_eq!(f.lock("/f").await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_unlock_without_header_is_400_unknown_token_404() {
    let f = Fixture::new();
    f.put_ok("/f", "x").await;
    assert_eq!(f.send("UNLOCK", "/f", &[], "").await.status, StatusCode::BAD_REQUEST);
    let reply = f
        .send("UNLOCK", "/f", &[("Lock-Token", "<urn:uuid:nope>")], "")
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unlock_with_token_for_other_resource_is_409() {
    let f = Fixture::new();
    f.put_ok("/a", "x").await;
    f.put_ok("/b", "y").await;
    let token = lock_token(&f.lock("/a").await);

    // The token names a live lock, but /b is outside its scope.
    let reply = f
        .send("UNLOCK", "/b", &[("Lock-Token", &format!("<{token}>"))], "")
        .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);

    // The lock on /a survives the attempt.
    assert_eq!(f.send("PUT", "/a", &[], "z").await.status, StatusCode::LOCKED);
    let reply = f
        .send("UNLOCK", "/a", &[("Lock-Token", &format!("<{token}>"))], "")
        .await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_lock_on_unmapped_path_creates_empty_resource() {
    let f = Fixture::new();
    let reply = f.lock("/fresh").await;
    assert_eq!(reply.status, StatusCode::CREATED);

    let reply = f.get("/fresh").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.is_empty());
}

#[tokio::test]
async fn test_lock_refresh_with_if_header() {
    let f = Fixture::new();
    f.put_ok("/f", "x").await;
    let token = lock_token(&f.lock("/f").await);

    let reply = f
        .send(
            "LOCK",
            "/f",
            &[("If", &if_token(&token)), ("Timeout", "Second-120")],
            "",
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.contains("Second-120"));
    assert!(reply.body.contains(&token));
}

#[tokio::test]
async fn test_refresh_without_matching_lock_is_412() {
    let f = Fixture::new();
    f.put_ok("/f", "x").await;
    let reply = f
        .send("LOCK", "/f", &[("If", "(<urn:uuid:stale>)")], "")
        .await;
    assert_eq!(reply.status, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_depth_infinity_lock_covers_children() {
    let f = Fixture::new();
    f.mkcol_ok("/dir").await;
    f.put_ok("/dir/f", "x").await;

    let body = r#"<D:lockinfo xmlns:D="DAV:">
        <D:lockscope><D:exclusive/></D:lockscope>
        <D:locktype><D:write/></D:locktype>
    </D:lockinfo>"#;
    let reply = f
        .send("LOCK", "/dir", &[("Depth", "infinity")], body.to_string())
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    let token = lock_token(&reply);

    assert_eq!(f.send("PUT", "/dir/f", &[], "y").await.status, StatusCode::LOCKED);
    assert_eq!(f.send("PUT", "/dir/new", &[], "z").await.status, StatusCode::LOCKED);
    let reply = f.send("PUT", "/dir/f", &[("If", &if_token(&token))], "y").await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_shared_locks_coexist_but_all_tokens_needed() {
    let f = Fixture::new();
    f.put_ok("/f", "x").await;
    let body = r#"<D:lockinfo xmlns:D="DAV:">
        <D:lockscope><D:shared/></D:lockscope>
        <D:locktype><D:write/></D:locktype>
    </D:lockinfo>"#;

    let a = f.send("LOCK", "/f", &[("Depth", "0")], body.to_string()).await;
    let b = f.send("LOCK", "/f", &[("Depth", "0")], body.to_string()).await;
    assert_eq!(a.status, StatusCode::OK);
    assert_eq!(b.status, StatusCode::OK);
    let (ta, tb) = (lock_token(&a), lock_token(&b));

    // One token is not enough while the other shared lock is live.
    let reply = f.send("PUT", "/f", &[("If", &if_token(&ta))], "y").await;
    assert_eq!(reply.status, StatusCode::LOCKED);

    let both = format!("(<{ta}>) (<{tb}>)");
    let reply = f.send("PUT", "/f", &[("If", &both)], "y").await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_lockdiscovery_visible_via_propfind() {
    let f = Fixture::new();
    f.put_ok("/f", "x").await;
    let token = lock_token(&f.lock("/f").await);

    let body = r#"<D:propfind xmlns:D="DAV:"><D:prop><D:lockdiscovery/></D:prop></D:propfind>"#;
    let reply = f.propfind("/f", "0", body).await;
    assert_eq!(reply.status, StatusCode::MULTI_STATUS);
    assert!(reply.body.contains("activelock"));
    assert!(reply.body.contains(&token));
    assert!(reply.body.contains("<D:lockroot><D:href>/f</D:href></D:lockroot>"));
}

#[tokio::test]
async fn test_delete_discards_locks() {
    let f = Fixture::new();
    f.put_ok("/f", "x").await;
    let token = lock_token(&f.lock("/f").await);

    let reply = f.send("DELETE", "/f", &[("If", &if_token(&token))], "").await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    // The token no longer names a live lock.
    let reply = f
        .send("UNLOCK", "/f", &[("Lock-Token", &format!("<{token}>"))], "")
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_if_header_etag_condition() {
    let f = Fixture::new();
    f.put_ok("/f", "x").await;
    let etag = f.get("/f").await.headers.get("etag").unwrap().to_str().unwrap().to_string();

    let good = format!("([{etag}])");
    let reply = f.send("PUT", "/f", &[("If", &good)], "y").await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let reply = f.send("PUT", "/f", &[("If", "([\"wrong\"])")], "z").await;
    assert_eq!(reply.status, StatusCode::PRECONDITION_FAILED);
}
