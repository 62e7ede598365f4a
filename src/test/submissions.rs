#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use rocket::tokio;

    use crate::api::SubmissionResponse;
    use crate::control::{ControlState, InFlightControls, control_key};
    use crate::db;
    use crate::submission::{
        CACHE_CONTROL_SECS, FileMeta, MAX_FILE_SIZE, REFRESH_AFTER_MS, SUBMISSION_BUCKET,
        SubmissionError, object_key, sanitize_file_name, submit, validate_file,
    };
    use crate::test::utils::test_client::{login_test_user, setup_test_client};
    use crate::test::utils::test_db::create_standard_test_db;
    use crate::test::utils::test_storage::RecordingStorage;
    use crate::validation::ValidationResponse;

    const PDF: &str = "application/pdf";

    fn pdf(name: &str, size: u64) -> FileMeta<'_> {
        FileMeta {
            name,
            content_type: PDF,
            size,
        }
    }

    #[test]
    fn test_validate_file_checks_type_then_size_then_name() {
        let wrong_everything = FileMeta {
            name: "a:b.txt",
            content_type: "text/plain",
            size: MAX_FILE_SIZE + 1,
        };
        assert!(matches!(
            validate_file(&wrong_everything),
            Err(SubmissionError::InvalidFileType(_))
        ));

        assert!(matches!(
            validate_file(&pdf("a:b.pdf", 52_428_801)),
            Err(SubmissionError::FileTooLarge(52_428_801))
        ));

        assert!(matches!(
            validate_file(&pdf("a:b.pdf", 10)),
            Err(SubmissionError::InvalidFileName(c)) if c == ":"
        ));

        assert!(validate_file(&pdf("report.pdf", MAX_FILE_SIZE)).is_ok());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("my report.pdf"), "my_report.pdf");
        assert_eq!(sanitize_file_name("week 3 (final).v2.pdf"), "week_3__final__v2.pdf");
        assert_eq!(sanitize_file_name("no extension"), "no_extension");

        let once = sanitize_file_name("résumé draft.pdf");
        assert_eq!(sanitize_file_name(&once), once);
    }

    #[test]
    fn test_object_key_layout() {
        assert_eq!(
            object_key("u1", "a1", 1_700_000_000_000, "my report.pdf"),
            "u1/a1/1700000000000-my_report.pdf"
        );
    }

    #[tokio::test]
    async fn test_submit_uploads_then_records() {
        let test_db = create_standard_test_db().await;
        let storage = RecordingStorage::default();
        let in_flight = InFlightControls::new();
        let user_id = test_db.user_id("student@example.com");
        let assignment_id = test_db.assignment_id("Report 2");

        let receipt = submit(
            &test_db.pool,
            &storage,
            &in_flight,
            &user_id,
            &assignment_id,
            &pdf("my report.pdf", 7),
            b"%PDF-1.",
        )
        .await
        .unwrap();

        let prefix = format!("{}/{}/", user_id, assignment_id);
        assert!(receipt.object_key.starts_with(&prefix));
        assert!(receipt.object_key.ends_with("-my_report.pdf"));
        assert_eq!(receipt.refresh_after_ms, REFRESH_AFTER_MS);

        let uploads = storage.recorded();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].bucket, SUBMISSION_BUCKET);
        assert_eq!(uploads[0].path, receipt.object_key);
        assert_eq!(uploads[0].size, 7);
        assert!(uploads[0].options.overwrite);
        assert_eq!(uploads[0].options.cache_control_secs, CACHE_CONTROL_SECS);

        let stored = db::get_submission(&test_db.pool, &user_id, &assignment_id)
            .await
            .unwrap()
            .expect("submission row should exist");
        assert_eq!(stored.file_name, "my report.pdf");
        assert_eq!(stored.file_size, 7);
        assert_eq!(
            stored.file_url,
            format!(
                "https://cdn.example/storage/{}/{}",
                SUBMISSION_BUCKET, receipt.object_key
            )
        );
        assert!(!in_flight.is_in_flight(&control_key(&user_id, "submission", &assignment_id)));
    }

    #[tokio::test]
    async fn test_two_megabyte_report() {
        let test_db = create_standard_test_db().await;
        let storage = RecordingStorage::default();
        let in_flight = InFlightControls::new();
        let bytes = vec![0u8; 2_097_152];

        let receipt = submit(
            &test_db.pool,
            &storage,
            &in_flight,
            &test_db.user_id("student@example.com"),
            &test_db.assignment_id("Problem set"),
            &pdf("report.pdf", bytes.len() as u64),
            &bytes,
        )
        .await
        .unwrap();

        assert!(receipt.object_key.ends_with("-report.pdf"));
        assert_eq!(receipt.submission.file_name, "report.pdf");
        assert_eq!(receipt.submission.file_size, 2_097_152);
        assert_eq!(storage.recorded()[0].size, 2_097_152);
    }

    #[tokio::test]
    async fn test_resubmission_replaces_previous_row() {
        let test_db = create_standard_test_db().await;
        let storage = RecordingStorage::default();
        let in_flight = InFlightControls::new();
        let user_id = test_db.user_id("student@example.com");
        let assignment_id = test_db.assignment_id("Report 2");

        let first = submit(
            &test_db.pool,
            &storage,
            &in_flight,
            &user_id,
            &assignment_id,
            &pdf("first.pdf", 3),
            b"one",
        )
        .await
        .unwrap();

        let second = submit(
            &test_db.pool,
            &storage,
            &in_flight,
            &user_id,
            &assignment_id,
            &pdf("second.pdf", 5),
            b"two!!",
        )
        .await
        .unwrap();

        assert_eq!(test_db.count("submissions").await, 1);
        assert_eq!(second.submission.id, first.submission.id);
        assert_eq!(second.submission.file_name, "second.pdf");
        assert_eq!(second.submission.file_size, 5);
        assert!(second.submission.updated_at >= first.submission.updated_at);
    }

    #[tokio::test]
    async fn test_failed_upload_writes_nothing() {
        let test_db = create_standard_test_db().await;
        let storage = RecordingStorage::failing();
        let in_flight = InFlightControls::new();

        let result = submit(
            &test_db.pool,
            &storage,
            &in_flight,
            &test_db.user_id("student@example.com"),
            &test_db.assignment_id("Report 2"),
            &pdf("report.pdf", 3),
            b"abc",
        )
        .await;

        assert!(matches!(result, Err(SubmissionError::UploadFailed(_))));
        assert_eq!(test_db.count("submissions").await, 0);
    }

    #[tokio::test]
    async fn test_failed_record_leaves_uploaded_object() {
        let test_db = create_standard_test_db().await;
        let storage = RecordingStorage::default();
        let in_flight = InFlightControls::new();
        let user_id = test_db.user_id("student@example.com");
        let assignment_id = test_db.assignment_id("Report 2");

        sqlx::query("DROP TABLE submissions")
            .execute(&test_db.pool)
            .await
            .unwrap();

        let result = submit(
            &test_db.pool,
            &storage,
            &in_flight,
            &user_id,
            &assignment_id,
            &pdf("report.pdf", 3),
            b"abc",
        )
        .await;

        assert!(matches!(result, Err(SubmissionError::RecordFailed(_))));

        let uploads = storage.recorded();
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].path.ends_with("-report.pdf"));
        assert!(!in_flight.is_in_flight(&control_key(&user_id, "submission", &assignment_id)));
    }

    #[tokio::test]
    async fn test_invalid_file_never_reaches_storage() {
        let test_db = create_standard_test_db().await;
        let storage = RecordingStorage::default();
        let in_flight = InFlightControls::new();

        let result = submit(
            &test_db.pool,
            &storage,
            &in_flight,
            &test_db.user_id("student@example.com"),
            &test_db.assignment_id("Report 2"),
            &FileMeta {
                name: "notes.docx",
                content_type: "application/msword",
                size: 3,
            },
            b"abc",
        )
        .await;

        assert!(matches!(result, Err(SubmissionError::InvalidFileType(_))));
        assert!(storage.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_assignment() {
        let test_db = create_standard_test_db().await;
        let storage = RecordingStorage::default();
        let in_flight = InFlightControls::new();

        let result = submit(
            &test_db.pool,
            &storage,
            &in_flight,
            &test_db.user_id("student@example.com"),
            "missing-assignment",
            &pdf("report.pdf", 3),
            b"abc",
        )
        .await;

        assert!(matches!(result, Err(SubmissionError::AssignmentNotFound(_))));
        assert!(storage.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_submission_already_in_flight() {
        let test_db = create_standard_test_db().await;
        let storage = RecordingStorage::default();
        let in_flight = InFlightControls::new();
        let user_id = test_db.user_id("student@example.com");
        let assignment_id = test_db.assignment_id("Report 2");

        let _held = in_flight
            .try_acquire(control_key(&user_id, "submission", &assignment_id))
            .unwrap();

        let result = submit(
            &test_db.pool,
            &storage,
            &in_flight,
            &user_id,
            &assignment_id,
            &pdf("report.pdf", 3),
            b"abc",
        )
        .await;

        assert!(matches!(result, Err(SubmissionError::InProgress)));
        assert!(storage.recorded().is_empty());
    }

    fn multipart(file_name: &str, content_type: &str, contents: &str) -> (ContentType, Vec<u8>) {
        multipart_bytes(file_name, content_type, contents.as_bytes())
    }

    fn multipart_bytes(
        file_name: &str,
        content_type: &str,
        contents: &[u8],
    ) -> (ContentType, Vec<u8>) {
        let boundary = "X-WEBCAMPUS-BOUNDARY";
        let mut body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: {content_type}\r\n\
             \r\n"
        )
        .into_bytes();
        body.extend_from_slice(contents);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let header = ContentType::new("multipart", "form-data").with_params(("boundary", boundary));
        (header, body)
    }

    #[rocket::async_test]
    async fn test_submit_over_http_and_download() {
        let test_db = create_standard_test_db().await;
        let (client, _storage_dir) = setup_test_client(&test_db).await;
        login_test_user(&client, "student@example.com").await;

        let assignment_id = test_db.assignment_id("Report 2");
        let (content_type, body) = multipart("report.pdf", PDF, "%PDF-1.4 test");

        let response = client
            .post(format!("/api/assignments/{}/submission", assignment_id))
            .header(content_type)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let submitted: SubmissionResponse = response.into_json().await.unwrap();
        assert_eq!(submitted.state, ControlState::Applied);
        assert_eq!(submitted.receipt.submission.file_name, "report.pdf");

        let response = client
            .get(format!(
                "/storage/{}/{}",
                SUBMISSION_BUCKET, submitted.receipt.object_key
            ))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(
            response.headers().get_one("Cache-Control"),
            Some("max-age=3600")
        );
        assert_eq!(response.content_type(), Some(ContentType::PDF));
        assert_eq!(response.into_string().await.unwrap(), "%PDF-1.4 test");
    }

    #[rocket::async_test]
    async fn test_submit_over_http_rejects_non_pdf() {
        let test_db = create_standard_test_db().await;
        let (client, _storage_dir) = setup_test_client(&test_db).await;
        login_test_user(&client, "student@example.com").await;

        let (content_type, body) = multipart("notes.txt", "text/plain", "hello");
        let response = client
            .post(format!(
                "/api/assignments/{}/submission",
                test_db.assignment_id("Report 2")
            ))
            .header(content_type)
            .body(body)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::UnprocessableEntity);
        let errors: ValidationResponse = response.into_json().await.unwrap();
        assert!(errors.message("file").is_some());
        assert_eq!(test_db.count("submissions").await, 0);
    }

    #[rocket::async_test]
    async fn test_oversize_upload_reports_file_too_large() {
        let test_db = create_standard_test_db().await;
        let (client, _storage_dir) = setup_test_client(&test_db).await;
        login_test_user(&client, "student@example.com").await;

        let contents = vec![b'%'; 61 * 1024 * 1024];
        let (content_type, body) = multipart_bytes("huge.pdf", PDF, &contents);
        let response = client
            .post(format!(
                "/api/assignments/{}/submission",
                test_db.assignment_id("Report 2")
            ))
            .header(content_type)
            .body(body)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::UnprocessableEntity);
        let errors: ValidationResponse = response.into_json().await.unwrap();
        let message = errors.message("file").expect("file error");
        assert!(message.contains("50 MB"), "unexpected message: {message}");
        assert_eq!(test_db.count("submissions").await, 0);
    }

    #[rocket::async_test]
    async fn test_content_type_parameters_are_ignored() {
        let test_db = create_standard_test_db().await;
        let (client, _storage_dir) = setup_test_client(&test_db).await;
        login_test_user(&client, "student@example.com").await;

        let (content_type, body) =
            multipart("report.pdf", "application/pdf; name=report.pdf", "%PDF-1.4");
        let response = client
            .post(format!(
                "/api/assignments/{}/submission",
                test_db.assignment_id("Report 2")
            ))
            .header(content_type)
            .body(body)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        assert_eq!(test_db.count("submissions").await, 1);
    }

    #[rocket::async_test]
    async fn test_failed_submission_reports_control_state() {
        let test_db = create_standard_test_db().await;
        let (client, _storage_dir) = setup_test_client(&test_db).await;
        login_test_user(&client, "student@example.com").await;

        let (content_type, body) = multipart("report.pdf", PDF, "%PDF");
        let response = client
            .post("/api/assignments/missing-assignment/submission")
            .header(content_type)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);

        let errors: ValidationResponse = response.into_json().await.unwrap();
        assert_eq!(errors.state, Some(ControlState::Reverted));

        let user_id = test_db.user_id("student@example.com");
        let assignment_id = test_db.assignment_id("Report 2");
        let registry = client.rocket().state::<InFlightControls>().unwrap();
        let _held = registry
            .try_acquire(control_key(&user_id, "submission", &assignment_id))
            .unwrap();

        let (content_type, body) = multipart("report.pdf", PDF, "%PDF");
        let response = client
            .post(format!("/api/assignments/{}/submission", assignment_id))
            .header(content_type)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);

        let errors: ValidationResponse = response.into_json().await.unwrap();
        assert_eq!(errors.state, Some(ControlState::Pending));
    }

    #[rocket::async_test]
    async fn test_teacher_cannot_submit() {
        let test_db = create_standard_test_db().await;
        let (client, _storage_dir) = setup_test_client(&test_db).await;
        login_test_user(&client, "teacher@example.com").await;

        let (content_type, body) = multipart("report.pdf", PDF, "%PDF");
        let response = client
            .post(format!(
                "/api/assignments/{}/submission",
                test_db.assignment_id("Report 2")
            ))
            .header(content_type)
            .body(body)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
    }
}
