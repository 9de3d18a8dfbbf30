//! Single-file upload flows: link generation, upload, dedupe, resume,
//! download round-trips, and request-validation boundaries.

mod common;

use common::{md5_hex, payload, with_md5, TestNode};
use serde_json::json;

#[tokio::test]
async fn link_upload_returns_url_family_and_empty_checkpoint() {
    let node = TestNode::start().await;
    let (uid, single, multi, merge) = node.upload_link("a.png").await;

    assert!(single.starts_with("/api/storage/v0/upload?uid="));
    assert!(multi.starts_with("/api/storage/v0/upload/multi?uid="));
    assert!(merge.starts_with("/api/storage/v0/upload/merge?uid="));
    for url in [&single, &multi, &merge] {
        assert!(url.contains("&signature="));
        assert!(url.contains("&expire=86400"));
    }

    let checkpoint = node
        .get_json(&format!("/api/storage/v0/checkpoint?uid={uid}"))
        .await;
    assert_eq!(checkpoint["code"], 200);
    assert_eq!(checkpoint["data"], json!([]));

    // scratch directory was created on this node
    let uid_num: i64 = uid.parse().unwrap();
    assert!(node.state.scratch.exists(uid_num).await);
}

#[tokio::test]
async fn upload_then_download_roundtrip() {
    let node = TestNode::start().await;
    let data = payload(700 * 1024);
    let md5 = md5_hex(&data);

    let (uid, single, _, _) = node.upload_link("photo.png").await;
    let envelope = node.put_file(&with_md5(&single, &md5), &data).await;
    assert_eq!(envelope["code"], 200, "upload failed: {envelope}");

    // meta flipped to complete with measured content
    let uid_num: i64 = uid.parse().unwrap();
    let meta = node.state.meta.meta_by_uid(uid_num).unwrap().unwrap();
    assert_eq!(meta.status, 1);
    assert_eq!(meta.md5, md5);
    assert_eq!(meta.storage_size, data.len() as i64);
    assert!(!meta.multi_part);
    // scratch directory is gone after completion
    assert!(!node.state.scratch.exists(uid_num).await);

    let url = node.download_link(&uid, 600).await;
    let (status, body) = node.download(&url, None).await;
    assert_eq!(status, 200);
    assert_eq!(body.len(), data.len());
    assert_eq!(body, data);
    assert_eq!(md5_hex(&body), md5);
}

#[tokio::test]
async fn ranged_downloads_cover_boundaries() {
    let node = TestNode::start().await;
    let data = payload(10_000);
    let md5 = md5_hex(&data);
    let (uid, single, _, _) = node.upload_link("r.bin.zip").await;
    node.put_file(&with_md5(&single, &md5), &data).await;
    let url = node.download_link(&uid, 600).await;

    let (status, body) = node.download(&url, Some("bytes=0-")).await;
    assert_eq!(status, 206);
    assert_eq!(body, data);

    let (status, body) = node.download(&url, Some("bytes=0-0")).await;
    assert_eq!(status, 206);
    assert_eq!(body, data[0..1]);

    let (status, body) = node.download(&url, Some("bytes=9000-")).await;
    assert_eq!(status, 206);
    assert_eq!(body, data[9000..]);

    // oversized end clamps to size-1
    let (status, body) = node.download(&url, Some("bytes=9990-20000")).await;
    assert_eq!(status, 206);
    assert_eq!(body, data[9990..]);
}

#[tokio::test]
async fn second_upload_of_same_content_reuses_storage() {
    let node = TestNode::start().await;
    let data = payload(4096);
    let md5 = md5_hex(&data);

    let (first_uid, first_url, _, _) = node.upload_link("one.png").await;
    node.put_file(&with_md5(&first_url, &md5), &data).await;

    let (second_uid, second_url, _, _) = node.upload_link("two.png").await;
    let envelope = node.put_file(&with_md5(&second_url, &md5), &data).await;
    assert_eq!(envelope["code"], 200);

    let first = node
        .state
        .meta
        .meta_by_uid(first_uid.parse().unwrap())
        .unwrap()
        .unwrap();
    let second = node
        .state
        .meta
        .meta_by_uid(second_uid.parse().unwrap())
        .unwrap()
        .unwrap();
    assert_ne!(first.uid, second.uid);
    assert_eq!(first.storage_name, second.storage_name);
    assert_eq!(first.address, second.address);
    assert_eq!(second.status, 1);
}

#[tokio::test]
async fn resume_clones_completed_upload_without_bytes() {
    let node = TestNode::start().await;
    let data = payload(2048);
    let md5 = md5_hex(&data);

    // unknown md5 first: uid comes back empty
    let envelope = node
        .post_json(
            "/api/storage/v0/resume",
            json!({"data": [{"md5": md5, "path": "b.png"}]}),
        )
        .await;
    assert_eq!(envelope["code"], 200);
    assert_eq!(envelope["data"][0]["uid"], "");

    let (first_uid, url, _, _) = node.upload_link("a.png").await;
    node.put_file(&with_md5(&url, &md5), &data).await;

    let envelope = node
        .post_json(
            "/api/storage/v0/resume",
            json!({"data": [{"md5": md5, "path": "b.png"}]}),
        )
        .await;
    assert_eq!(envelope["code"], 200);
    let cloned_uid = envelope["data"][0]["uid"].as_str().unwrap().to_string();
    assert!(!cloned_uid.is_empty());
    assert_ne!(cloned_uid, first_uid);

    // storage pointers are byte-identical to the source row
    let source = node
        .state
        .meta
        .meta_by_uid(first_uid.parse().unwrap())
        .unwrap()
        .unwrap();
    let clone = node
        .state
        .meta
        .meta_by_uid(cloned_uid.parse().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(clone.storage_name, source.storage_name);
    assert_eq!(clone.address, source.address);
    assert_eq!(clone.storage_size, source.storage_size);
    assert_eq!(clone.content_type, source.content_type);
    assert_eq!(clone.name, "b.png");
    assert_eq!(clone.status, 1);

    // the clone downloads the same bytes
    let url = node.download_link(&cloned_uid, 600).await;
    let (_, body) = node.download(&url, None).await;
    assert_eq!(body, data);
}

#[tokio::test]
async fn md5_mismatch_is_a_param_error() {
    let node = TestNode::start().await;
    let data = payload(1000);

    let (uid, single, _, _) = node.upload_link("x.png").await;
    let envelope = node
        .put_file(&with_md5(&single, "00000000000000000000000000000000"), &data)
        .await;
    assert_eq!(envelope["code"], 400);

    // the upload stays pending
    let meta = node
        .state
        .meta
        .meta_by_uid(uid.parse().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(meta.status, -1);
}

#[tokio::test]
async fn tampered_signature_is_rejected() {
    let node = TestNode::start().await;
    let data = payload(100);
    let md5 = md5_hex(&data);
    let (_, single, _, _) = node.upload_link("x.png").await;

    let tampered = single.replace("&signature=", "&signature=ff");
    let envelope = node.put_file(&with_md5(&tampered, &md5), &data).await;
    assert_eq!(envelope["code"], 400);
}

#[tokio::test]
async fn upload_to_unknown_uid_is_not_found() {
    let node = TestNode::start().await;
    let data = payload(100);
    let md5 = md5_hex(&data);

    // valid signature, but the uid has no meta row
    let date = blobgate::signer::now_date();
    let query = node.state.signer.upload_query("123456789", &date, 600);
    let envelope = node
        .put_file(
            &with_md5(&format!("/api/storage/v0/upload?{query}"), &md5),
            &data,
        )
        .await;
    assert_eq!(envelope["code"], 404);
}

#[tokio::test]
async fn link_batch_limits_are_enforced() {
    let node = TestNode::start().await;

    let many: Vec<String> = (0..51).map(|i| format!("f{i}.png")).collect();
    let envelope = node
        .post_json(
            "/api/storage/v0/link/upload",
            json!({"filePath": many, "expire": 600}),
        )
        .await;
    assert_eq!(envelope["code"], 400);

    let ok: Vec<String> = (0..50).map(|i| format!("f{i}.png")).collect();
    let envelope = node
        .post_json(
            "/api/storage/v0/link/upload",
            json!({"filePath": ok, "expire": 600}),
        )
        .await;
    assert_eq!(envelope["code"], 200);
    assert_eq!(envelope["data"].as_array().unwrap().len(), 50);

    let many_uids: Vec<String> = (0..201).map(|i| i.to_string()).collect();
    let envelope = node
        .post_json(
            "/api/storage/v0/link/download",
            json!({"uid": many_uids, "expire": 600}),
        )
        .await;
    assert_eq!(envelope["code"], 400);

    let ok_uids: Vec<String> = (0..200).map(|i| i.to_string()).collect();
    let envelope = node
        .post_json(
            "/api/storage/v0/link/download",
            json!({"uid": ok_uids, "expire": 600}),
        )
        .await;
    assert_eq!(envelope["code"], 200);
}

#[tokio::test]
async fn path_without_extension_is_rejected() {
    let node = TestNode::start().await;
    let envelope = node
        .post_json(
            "/api/storage/v0/link/upload",
            json!({"filePath": ["noext"], "expire": 600}),
        )
        .await;
    assert_eq!(envelope["code"], 400);
}

#[tokio::test]
async fn liveness_endpoints_answer() {
    let node = TestNode::start().await;
    let health = node.get_json("/api/storage/v0/health").await;
    assert_eq!(health["code"], 200);

    let ping = node.get_json("/api/storage/v0/ping").await;
    assert_eq!(ping["code"], 200);
    assert_eq!(ping["data"], "pong");
}

#[tokio::test]
async fn proxy_reports_scratch_locality() {
    let node = TestNode::start().await;
    let (uid, _, _, _) = node.upload_link("p.png").await;

    let owned = node.get_json(&format!("/api/storage/v0/proxy?uid={uid}")).await;
    assert_eq!(owned["code"], 200);
    assert_eq!(owned["data"], "127.0.0.1");

    let missing = node.get_json("/api/storage/v0/proxy?uid=42").await;
    assert_eq!(missing["code"], 404);
}
