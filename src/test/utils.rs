#[cfg(test)]
pub mod test_db {
    use crate::auth::Role;
    use crate::database::apply_schema;
    use crate::error::AppError;
    use chrono::{DateTime, Utc};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Once;
    use uuid::Uuid;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    /// Opens a private in-memory database. A single connection keeps every
    /// query on the same memory store.
    pub async fn memory_pool() -> Result<Pool<Sqlite>, AppError> {
        INIT.call_once(|| {
            let _ = env_logger::builder()
                .parse_filters("debug")
                .is_test(true)
                .try_init();
        });

        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        apply_schema(&pool).await?;
        Ok(pool)
    }

    pub struct TestUser {
        pub email: String,
        pub phone: Option<String>,
        pub role: Option<String>,
        pub password: String,
    }

    pub struct TestLesson {
        pub name: String,
        pub teacher: String,
    }

    pub struct TestMaterial {
        pub lesson_name: String,
        pub name: String,
        pub created_at: DateTime<Utc>,
    }

    pub struct TestAssignment {
        pub lesson_name: String,
        pub name: String,
        pub deadline: DateTime<Utc>,
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        lessons: Vec<TestLesson>,
        materials: Vec<TestMaterial>,
        assignments: Vec<TestAssignment>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        fn user(mut self, email: &str, role: Option<&str>) -> Self {
            self.users.push(TestUser {
                email: email.to_string(),
                phone: None,
                role: role.map(String::from),
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn student(self, email: &str) -> Self {
            self.user(email, Some(Role::Student.as_str()))
        }

        pub fn teacher(self, email: &str) -> Self {
            self.user(email, Some(Role::Teacher.as_str()))
        }

        pub fn admin(self, email: &str) -> Self {
            self.user(email, Some(Role::Admin.as_str()))
        }

        /// Stores the role text verbatim, e.g. legacy or mixed-case spellings.
        pub fn user_with_role_text(self, email: &str, role: &str) -> Self {
            self.user(email, Some(role))
        }

        pub fn user_without_role(self, email: &str) -> Self {
            self.user(email, None)
        }

        pub fn phone_user(mut self, email: &str, phone: &str, role: Role) -> Self {
            self.users.push(TestUser {
                email: email.to_string(),
                phone: Some(phone.to_string()),
                role: Some(role.as_str().to_string()),
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn lesson(mut self, name: &str, teacher: &str) -> Self {
            self.lessons.push(TestLesson {
                name: name.to_string(),
                teacher: teacher.to_string(),
            });
            self
        }

        pub fn material(mut self, lesson_name: &str, name: &str, created_at: DateTime<Utc>) -> Self {
            self.materials.push(TestMaterial {
                lesson_name: lesson_name.to_string(),
                name: name.to_string(),
                created_at,
            });
            self
        }

        pub fn assignment(mut self, lesson_name: &str, name: &str, deadline: DateTime<Utc>) -> Self {
            self.assignments.push(TestAssignment {
                lesson_name: lesson_name.to_string(),
                name: name.to_string(),
                deadline,
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            let pool = memory_pool().await?;

            let mut user_ids = HashMap::new();
            let mut lesson_ids = HashMap::new();
            let mut material_ids = HashMap::new();
            let mut assignment_ids = HashMap::new();

            for user in &self.users {
                let id = Uuid::new_v4().to_string();
                let hash = bcrypt::hash(&user.password, 4)?;

                sqlx::query(
                    "INSERT INTO auth_users (id, email, phone, password_hash, created_at)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(&user.email)
                .bind(&user.phone)
                .bind(hash)
                .bind(Utc::now())
                .execute(&pool)
                .await?;

                if let Some(role) = &user.role {
                    sqlx::query("INSERT INTO roles (user_id, role) VALUES (?, ?)")
                        .bind(&id)
                        .bind(role)
                        .execute(&pool)
                        .await?;
                }

                user_ids.insert(user.email.clone(), id);
            }

            for lesson in &self.lessons {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO lessons (id, name, teacher, syllabus_url, created_at)
                     VALUES (?, ?, ?, NULL, ?)",
                )
                .bind(&id)
                .bind(&lesson.name)
                .bind(&lesson.teacher)
                .bind(Utc::now())
                .execute(&pool)
                .await?;

                lesson_ids.insert(lesson.name.clone(), id);
            }

            for material in &self.materials {
                let lesson_id = lesson_ids.get(&material.lesson_name).ok_or_else(|| {
                    AppError::NotFound(format!("test lesson {}", material.lesson_name))
                })?;
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO materials (id, lesson_id, name, content_url, created_at)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(lesson_id)
                .bind(&material.name)
                .bind(format!("https://files.example/{}", material.name))
                .bind(material.created_at)
                .execute(&pool)
                .await?;

                material_ids.insert(material.name.clone(), id);
            }

            for assignment in &self.assignments {
                let lesson_id = lesson_ids.get(&assignment.lesson_name).ok_or_else(|| {
                    AppError::NotFound(format!("test lesson {}", assignment.lesson_name))
                })?;
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO assignments (id, lesson_id, name, content_url, deadline, created_at)
                     VALUES (?, ?, ?, NULL, ?, ?)",
                )
                .bind(&id)
                .bind(lesson_id)
                .bind(&assignment.name)
                .bind(assignment.deadline)
                .bind(Utc::now())
                .execute(&pool)
                .await?;

                assignment_ids.insert(assignment.name.clone(), id);
            }

            Ok(TestDb {
                pool,
                user_ids,
                lesson_ids,
                material_ids,
                assignment_ids,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_ids: HashMap<String, String>,
        pub lesson_ids: HashMap<String, String>,
        pub material_ids: HashMap<String, String>,
        pub assignment_ids: HashMap<String, String>,
    }

    impl TestDb {
        pub fn user_id(&self, email: &str) -> String {
            self.user_ids[email].clone()
        }

        pub fn lesson_id(&self, name: &str) -> String {
            self.lesson_ids[name].clone()
        }

        pub fn material_id(&self, name: &str) -> String {
            self.material_ids[name].clone()
        }

        pub fn assignment_id(&self, name: &str) -> String {
            self.assignment_ids[name].clone()
        }

        pub async fn count(&self, table: &str) -> i64 {
            sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await
                .unwrap()
        }
    }

    /// Two students, a teacher, an admin, one account without a role, and a
    /// small catalog: one lesson with two materials and three assignments.
    pub async fn create_standard_test_db() -> TestDb {
        let now = Utc::now();

        TestDbBuilder::new()
            .student("student@example.com")
            .student("other@example.com")
            .teacher("teacher@example.com")
            .admin("admin@example.com")
            .user_without_role("norole@example.com")
            .lesson("Physics", "Dr. Ito")
            .lesson("Algebra", "Ms. Sato")
            .material("Physics", "Lecture notes", now - chrono::Duration::days(2))
            .material("Physics", "Lab sheet", now - chrono::Duration::days(1))
            .assignment("Physics", "Report 1", now - chrono::Duration::days(1))
            .assignment("Physics", "Report 2", now + chrono::Duration::days(3))
            .assignment("Algebra", "Problem set", now + chrono::Duration::hours(5))
            .build()
            .await
            .unwrap()
    }
}

#[cfg(test)]
pub mod test_storage {
    use std::sync::Mutex;

    use crate::storage::{ObjectStorage, StorageError, StoredObject, UploadOptions};

    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedUpload {
        pub bucket: String,
        pub path: String,
        pub size: usize,
        pub options: UploadOptions,
    }

    /// Remembers every upload; optionally fails them all.
    #[derive(Default)]
    pub struct RecordingStorage {
        pub uploads: Mutex<Vec<RecordedUpload>>,
        pub fail_uploads: bool,
    }

    impl RecordingStorage {
        pub fn failing() -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
                fail_uploads: true,
            }
        }

        pub fn recorded(&self) -> Vec<RecordedUpload> {
            self.uploads.lock().unwrap().clone()
        }
    }

    #[rocket::async_trait]
    impl ObjectStorage for RecordingStorage {
        async fn upload(
            &self,
            bucket: &str,
            path: &str,
            bytes: &[u8],
            options: UploadOptions,
        ) -> Result<(), StorageError> {
            if self.fail_uploads {
                return Err(StorageError::Io(std::io::Error::other("bucket offline")));
            }

            self.uploads.lock().unwrap().push(RecordedUpload {
                bucket: bucket.to_string(),
                path: path.to_string(),
                size: bytes.len(),
                options,
            });
            Ok(())
        }

        async fn download(&self, bucket: &str, path: &str) -> Result<StoredObject, StorageError> {
            Err(StorageError::NotFound(format!("{bucket}/{path}")))
        }

        fn public_url(&self, bucket: &str, path: &str) -> String {
            format!("https://cdn.example/storage/{bucket}/{path}")
        }
    }
}

#[cfg(test)]
pub mod test_client {
    use std::sync::Arc;

    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::api::{LoginResponse, SharedStorage};
    use crate::auth::{SharedIdentity, SqliteIdentity};
    use crate::config::AppConfig;
    use crate::init_rocket;
    use crate::storage::LocalObjectStorage;

    use super::test_db::{STANDARD_PASSWORD, TestDb};

    pub async fn setup_test_client(test_db: &TestDb) -> (Client, TempDir) {
        setup_test_client_with_config(test_db, AppConfig::default()).await
    }

    /// Builds a tracked client over the test database with objects stored in
    /// a fresh temporary directory.
    pub async fn setup_test_client_with_config(
        test_db: &TestDb,
        config: AppConfig,
    ) -> (Client, TempDir) {
        let storage_dir = tempfile::tempdir().unwrap();

        let identity: SharedIdentity = Arc::new(SqliteIdentity::new(
            test_db.pool.clone(),
            config.access_token_ttl,
            config.refresh_token_ttl,
        ));
        let storage: SharedStorage = Arc::new(LocalObjectStorage::new(
            storage_dir.path(),
            &config.public_base_url,
        ));

        let rocket = init_rocket(test_db.pool.clone(), identity, storage, config).await;
        let client = Client::tracked(rocket).await.unwrap();

        (client, storage_dir)
    }

    pub async fn login_test_user(client: &Client, identifier: &str) -> LoginResponse {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "identifier": identifier,
                    "password": STANDARD_PASSWORD
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        response.into_json::<LoginResponse>().await.unwrap()
    }
}
