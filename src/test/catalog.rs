#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rocket::http::Status;
    use rocket::tokio;

    use crate::catalog::{
        Countdown, DashboardAssignment, assignment_page, dashboard_assignments, lesson_page,
    };
    use crate::db;
    use crate::error::AppError;
    use crate::models::{BookmarkKind, Lesson};
    use crate::test::utils::test_client::{login_test_user, setup_test_client};
    use crate::test::utils::test_db::create_standard_test_db;

    #[test]
    fn test_countdown_formats() {
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();

        let overdue = Countdown::until(now - Duration::seconds(1), now);
        assert_eq!(overdue, Countdown::Overdue);
        assert_eq!(overdue.to_string(), "overdue");

        let days = Countdown::until(now + Duration::days(3) + Duration::hours(2), now);
        assert_eq!(days, Countdown::Days(3));
        assert_eq!(days.to_string(), "3d");

        let hours = Countdown::until(now + Duration::hours(5) + Duration::minutes(7), now);
        assert_eq!(hours.to_string(), "05:07");

        assert_eq!(Countdown::until(now, now).to_string(), "00:00");
        assert_eq!(
            Countdown::until(now + Duration::hours(23) + Duration::minutes(59), now).to_string(),
            "23:59"
        );
    }

    #[tokio::test]
    async fn test_lesson_page_marks_bookmarks_and_overdue() {
        let test_db = create_standard_test_db().await;
        let user_id = test_db.user_id("student@example.com");

        db::insert_bookmark(
            &test_db.pool,
            BookmarkKind::Material,
            &user_id,
            &test_db.material_id("Lab sheet"),
        )
        .await
        .unwrap();
        db::insert_bookmark(
            &test_db.pool,
            BookmarkKind::Assignment,
            &user_id,
            &test_db.assignment_id("Report 2"),
        )
        .await
        .unwrap();

        let page = lesson_page(&test_db.pool, &user_id, &test_db.lesson_id("Physics"), Utc::now())
            .await
            .unwrap();

        assert_eq!(page.lesson.name, "Physics");
        assert_eq!(page.lesson.teacher, "Dr. Ito");

        let materials: Vec<_> = page
            .materials
            .iter()
            .map(|m| (m.material.name.as_str(), m.bookmarked))
            .collect();
        assert_eq!(materials, vec![("Lab sheet", true), ("Lecture notes", false)]);

        let assignments: Vec<_> = page
            .assignments
            .iter()
            .map(|a| (a.assignment.name.as_str(), a.bookmarked, a.overdue))
            .collect();
        assert_eq!(
            assignments,
            vec![("Report 1", false, true), ("Report 2", true, false)]
        );

        // Bookmarks are per user.
        let other = lesson_page(
            &test_db.pool,
            &test_db.user_id("other@example.com"),
            &test_db.lesson_id("Physics"),
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(other.materials.iter().all(|m| !m.bookmarked));
    }

    #[tokio::test]
    async fn test_lesson_page_unknown_lesson() {
        let test_db = create_standard_test_db().await;

        let result = lesson_page(
            &test_db.pool,
            &test_db.user_id("student@example.com"),
            "missing",
            Utc::now(),
        )
        .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_assignment_page_submissions_visibility() {
        let test_db = create_standard_test_db().await;
        let student = test_db.user_id("student@example.com");
        let lesson_id = test_db.lesson_id("Physics");
        let assignment_id = test_db.assignment_id("Report 2");

        db::upsert_submission(
            &test_db.pool,
            &student,
            &assignment_id,
            "https://cdn.example/report.pdf",
            "report.pdf",
            42,
        )
        .await
        .unwrap();

        let own = assignment_page(
            &test_db.pool,
            &student,
            &lesson_id,
            &assignment_id,
            false,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(own.assignment.assignment.name, "Report 2");
        assert_eq!(
            own.own_submission.map(|s| s.file_name),
            Some("report.pdf".to_string())
        );
        assert_eq!(own.all_submissions, None);

        let teacher_view = assignment_page(
            &test_db.pool,
            &test_db.user_id("teacher@example.com"),
            &lesson_id,
            &assignment_id,
            true,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(teacher_view.own_submission, None);
        assert_eq!(teacher_view.all_submissions.map(|all| all.len()), Some(1));
    }

    #[tokio::test]
    async fn test_assignment_page_rejects_wrong_lesson() {
        let test_db = create_standard_test_db().await;

        let result = assignment_page(
            &test_db.pool,
            &test_db.user_id("student@example.com"),
            &test_db.lesson_id("Algebra"),
            &test_db.assignment_id("Report 2"),
            false,
            Utc::now(),
        )
        .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_dashboard_flags_submitted_and_overdue() {
        let test_db = create_standard_test_db().await;
        let student = test_db.user_id("student@example.com");

        db::upsert_submission(
            &test_db.pool,
            &student,
            &test_db.assignment_id("Report 2"),
            "https://cdn.example/r2.pdf",
            "r2.pdf",
            1,
        )
        .await
        .unwrap();

        let rows = dashboard_assignments(&test_db.pool, &student, Utc::now())
            .await
            .unwrap();

        let summary: Vec<_> = rows
            .iter()
            .map(|row| {
                (
                    row.assignment.name.as_str(),
                    row.lesson_name.as_deref(),
                    row.submitted,
                    row.overdue,
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Report 1", Some("Physics"), false, true),
                ("Problem set", Some("Algebra"), false, false),
                ("Report 2", Some("Physics"), true, false),
            ]
        );
        assert_eq!(rows[0].countdown, "overdue");
        assert!(rows[1].countdown.contains(':'));
        assert!(rows[2].countdown.ends_with('d'));
    }

    #[rocket::async_test]
    async fn test_catalog_over_http() {
        let test_db = create_standard_test_db().await;
        let (client, _storage) = setup_test_client(&test_db).await;
        login_test_user(&client, "student@example.com").await;

        let lessons: Vec<Lesson> = client
            .get("/api/lessons")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        let names: Vec<_> = lessons.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Algebra", "Physics"]);

        let dashboard: Vec<DashboardAssignment> = client
            .get("/api/assignments")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(dashboard.len(), 3);

        let path = format!(
            "/api/lessons/{}/assignments/{}",
            test_db.lesson_id("Physics"),
            test_db.assignment_id("Report 1")
        );
        let student_view: serde_json::Value = client
            .get(path.clone())
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert!(student_view.get("all_submissions").is_none());
        assert_eq!(student_view["assignment"]["overdue"], serde_json::json!(true));

        login_test_user(&client, "teacher@example.com").await;
        let teacher_view: serde_json::Value = client
            .get(path)
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert!(teacher_view["all_submissions"].is_array());

        let response = client.get("/api/lessons/missing").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_user_without_role_has_no_catalog_access() {
        let test_db = create_standard_test_db().await;
        let (client, _storage) = setup_test_client(&test_db).await;

        // An unrecognised role still signs in but grants nothing.
        sqlx::query("INSERT INTO roles (user_id, role) VALUES (?, 'observer')")
            .bind(test_db.user_id("norole@example.com"))
            .execute(&test_db.pool)
            .await
            .unwrap();

        let login = login_test_user(&client, "norole@example.com").await;
        assert!(login.success);
        assert_eq!(login.redirect_url.as_deref(), Some("/"));

        let response = client.get("/api/lessons").dispatch().await;
        assert_eq!(response.status(), Status::Forbidden);
    }
}
