mod common;

use axum::http::StatusCode;
use common::upload_http::{build_upload_request, create_upload_test_app, file_part, multipart_body};
use common::{create_test_data, list_files, setup_temp_dir};
use std::collections::HashSet;
use tower::ServiceExt;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_uploads_with_same_name_get_distinct_files() {
    let temp = setup_temp_dir();
    let (app, state) = create_upload_test_app(temp.path().to_path_buf());
    let uploads = 20usize;

    let mut handles = Vec::new();
    for i in 0..uploads {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            let data = create_test_data(i as u8, 1024 * (i + 1));
            let response = app
                .oneshot(build_upload_request(multipart_body(&[file_part(
                    "photo.jpg",
                    &data,
                )])))
                .await
                .unwrap();
            (response.status(), data.len() as u64)
        }));
    }

    let mut expected_total = 0u64;
    for handle in handles {
        let (status, size) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        expected_total += size;
    }

    let files = list_files(temp.path());
    assert_eq!(files.len(), uploads);
    assert_eq!(files.iter().collect::<HashSet<_>>().len(), uploads);

    let snapshot = state.store.snapshot();
    assert_eq!(snapshot.received_count, uploads as u64);
    assert_eq!(snapshot.total_size, expected_total);

    let on_disk: u64 = files
        .iter()
        .map(|name| std::fs::metadata(temp.path().join(name)).unwrap().len())
        .sum();
    assert_eq!(on_disk, expected_total);
    assert_eq!(state.transfer_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_upload_keeps_its_own_content() {
    let temp = setup_temp_dir();
    let (app, state) = create_upload_test_app(temp.path().to_path_buf());

    let mut handles = Vec::new();
    for i in 0..10u8 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            let name = format!("file-{i}.bin");
            let data = create_test_data(i, 64 * 1024);
            let response = app
                .oneshot(build_upload_request(multipart_body(&[file_part(&name, &data)])))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for i in 0..10u8 {
        let content = std::fs::read(temp.path().join(format!("file-{i}.bin"))).unwrap();
        assert!(content.iter().all(|b| *b == i));
        assert_eq!(content.len(), 64 * 1024);
    }

    let records = state.store.records();
    assert_eq!(records.len(), 10);
    assert!(records.iter().all(|r| r.size == 64 * 1024));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn snapshots_are_never_torn_while_uploading() {
    let temp = setup_temp_dir();
    let (app, state) = create_upload_test_app(temp.path().to_path_buf());
    let file_size = 4096u64;

    let reader_state = state.clone();
    let reader = tokio::spawn(async move {
        for _ in 0..200 {
            let snapshot = reader_state.store.snapshot();
            assert_eq!(snapshot.total_size, snapshot.received_count * file_size);
            tokio::task::yield_now().await;
        }
    });

    let mut handles = Vec::new();
    for i in 0..16u8 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            let data = create_test_data(i, file_size as usize);
            app.oneshot(build_upload_request(multipart_body(&[file_part(
                "same.bin", &data,
            )])))
            .await
            .unwrap()
            .status()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }
    reader.await.unwrap();

    assert_eq!(state.store.snapshot().received_count, 16);
}
