use std::sync::Arc;

use chrono::Utc;
use rocket::State;
use rocket::form::{Errors, Form, FromForm, error::ErrorKind};
use rocket::fs::TempFile;
use rocket::http::{ContentType, CookieJar, Header, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use rocket::tokio::io::AsyncReadExt;
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};
use validator::Validate;

use crate::auth::{
    LoginOutcome, Permission, Role, SessionContext, SessionUser, SharedIdentity, attempt_login,
    clear_session, store_session, store_tokens,
};
use crate::bookmark::{BookmarkToggleResult, toggle_bookmark};
use crate::catalog::{
    AssignmentPage, BookmarkListing, DashboardAssignment, LessonPage, assignment_page,
    bookmark_listing, dashboard_assignments, lesson_page,
};
use crate::config::AppConfig;
use crate::control::{ControlState, InFlightControls, ToggleControl};
use crate::db;
use crate::error::AppError;
use crate::models::{BookmarkKind, Lesson, Notification, School, UserProfile, UserSummary};
use crate::notification::{
    AssignmentOption, INBOX_LIMIT, NotificationDraft, RecipientPreview, Target,
    assignment_options, dispatch, preview_recipients,
};
use crate::schedule::{ScheduleDay, ScheduleInput, save_entry, weekly_schedule};
use crate::school::{ProfileInput, create_school, load_profile, save_profile};
use crate::storage::ObjectStorage;
use crate::submission::{FileMeta, SubmissionError, SubmissionReceipt, submit, validate_file};
use crate::validation::{ApiError, AppErrorExt, JsonValidateExt, ToValidationResponse};

pub type SharedStorage = Arc<dyn ObjectStorage>;

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(max = 254, message = "User ID is too long"))]
    identifier: String,
    #[validate(length(max = 1024, message = "Password is too long"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserSummary>,
    pub error: Option<String>,
    pub redirect_url: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SuccessResponse {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    identity: &State<SharedIdentity>,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, ApiError> {
    let validated = login.validate_custom()?;

    let outcome = attempt_login(
        identity.inner().as_ref(),
        db,
        &validated.identifier,
        &validated.password,
    )
    .await
    .validate_custom()?;

    match outcome {
        LoginOutcome::Authenticated {
            session,
            role,
            redirect,
        } => {
            store_session(cookies, &session, config.refresh_token_ttl);

            Ok(Json(LoginResponse {
                success: true,
                user: Some(UserSummary {
                    id: session.user.id.clone(),
                    email: session.user.email.clone().or(session.user.phone.clone()),
                    role,
                }),
                error: None,
                redirect_url: Some(redirect.to_string()),
            }))
        }
        LoginOutcome::Rejected { message } => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some(message),
            redirect_url: None,
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(
    session: Option<SessionContext>,
    cookies: &CookieJar<'_>,
    identity: &State<SharedIdentity>,
) -> Json<SuccessResponse> {
    if let Some(session) = session {
        if let Err(err) = identity.sign_out(&session.access_token).await {
            warn!(error = %err, "Sign-out at identity provider failed");
        }
    }

    clear_session(cookies);

    Json(SuccessResponse::ok())
}

#[derive(Serialize, Deserialize)]
pub struct MeResponse {
    pub user: UserSummary,
    pub redirect_url: String,
}

#[get("/me")]
pub async fn api_me(user: SessionUser) -> Json<MeResponse> {
    Json(MeResponse {
        redirect_url: Role::dashboard_path(user.role).to_string(),
        user: user.summary(),
    })
}

#[get("/lessons")]
pub async fn api_get_lessons(
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Lesson>>, ApiError> {
    user.require_permission(Permission::ViewCatalog)
        .validate_custom()?;

    let lessons = db::get_lessons(db).await.validate_custom()?;

    Ok(Json(lessons))
}

#[get("/lessons/<id>")]
pub async fn api_get_lesson(
    id: &str,
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LessonPage>, ApiError> {
    user.require_permission(Permission::ViewCatalog)
        .validate_custom()?;

    let page = lesson_page(db, &user.id, id, Utc::now())
        .await
        .validate_custom()?;

    Ok(Json(page))
}

#[get("/lessons/<lesson_id>/assignments/<assignment_id>")]
pub async fn api_get_assignment(
    lesson_id: &str,
    assignment_id: &str,
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AssignmentPage>, ApiError> {
    user.require_permission(Permission::ViewCatalog)
        .validate_custom()?;

    let page = assignment_page(
        db,
        &user.id,
        lesson_id,
        assignment_id,
        user.has_permission(Permission::ViewAllSubmissions),
        Utc::now(),
    )
    .await
    .validate_custom()?;

    Ok(Json(page))
}

#[get("/assignments")]
pub async fn api_get_assignments(
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<DashboardAssignment>>, ApiError> {
    user.require_permission(Permission::ViewCatalog)
        .validate_custom()?;

    let assignments = dashboard_assignments(db, &user.id, Utc::now())
        .await
        .validate_custom()?;

    Ok(Json(assignments))
}

#[derive(FromForm)]
pub struct SubmissionUpload<'r> {
    file: TempFile<'r>,
}

#[derive(Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub state: ControlState,
    #[serde(flatten)]
    pub receipt: SubmissionReceipt,
}

/// Maps a multipart failure onto the submission errors. A file part cut off
/// at the upload limit is reported as too large.
fn upload_error(errors: Errors<'_>) -> ApiError {
    let truncated_at = errors.iter().find_map(|error| match error.kind {
        ErrorKind::InvalidLength { max: Some(max), .. } => Some(max),
        _ => None,
    });

    let error = match truncated_at {
        Some(written) => AppError::from(SubmissionError::FileTooLarge(written)),
        None => {
            let message = errors
                .iter()
                .map(|error| error.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            AppError::invalid("file", format!("Invalid upload: {}", message))
        }
    };

    error.to_validation_response()
}

#[post("/assignments/<assignment_id>/submission", data = "<upload>")]
pub async fn api_submit_assignment(
    assignment_id: &str,
    upload: Result<Form<SubmissionUpload<'_>>, Errors<'_>>,
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
    storage: &State<SharedStorage>,
    in_flight: &State<InFlightControls>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    user.require_permission(Permission::SubmitAssignments)
        .validate_custom()?;

    let upload = upload.map_err(upload_error)?;
    let file = &upload.file;
    let name = file
        .raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .unwrap_or_default();
    let content_type = file
        .content_type()
        .map(|content_type| {
            format!("{}/{}", content_type.top(), content_type.sub()).to_ascii_lowercase()
        })
        .unwrap_or_default();
    let meta = FileMeta {
        name: &name,
        content_type: &content_type,
        size: file.len(),
    };

    validate_file(&meta).validate_custom()?;

    let mut bytes = Vec::new();
    let reader = file.open().await.validate_custom()?;
    rocket::tokio::pin!(reader);
    reader.read_to_end(&mut bytes).await.validate_custom()?;

    let mut control = ToggleControl::new(false);
    control.begin(true);

    match submit(
        db,
        storage.inner().as_ref(),
        in_flight,
        &user.id,
        assignment_id,
        &meta,
        &bytes,
    )
    .await
    {
        Ok(receipt) => {
            control.confirm();
            Ok(Json(SubmissionResponse {
                state: control.state(),
                receipt,
            }))
        }
        Err(err) => {
            // An in-flight conflict leaves the control with the other request.
            if !matches!(err, SubmissionError::InProgress) {
                control.revert(err.to_string());
                warn!(state = ?control.state(), error = ?control.error(), "Submission reverted");
            }
            let mut response = AppError::from(err).to_validation_response();
            response.1.0.state = Some(control.state());
            Err(response)
        }
    }
}

#[derive(Deserialize)]
pub struct BookmarkToggleRequest {
    bookmarked: bool,
}

#[post("/bookmarks/<kind>/<id>/toggle", data = "<request>")]
pub async fn api_toggle_bookmark(
    kind: BookmarkKind,
    id: &str,
    request: Json<BookmarkToggleRequest>,
    user: Option<SessionUser>,
    db: &State<Pool<Sqlite>>,
    in_flight: &State<InFlightControls>,
) -> Result<Json<BookmarkToggleResult>, ApiError> {
    if let Some(user) = &user {
        user.require_permission(Permission::ManageOwnBookmarks)
            .validate_custom()?;
    }

    let result = toggle_bookmark(
        db,
        in_flight,
        user.as_ref().map(|u| u.id.as_str()),
        kind,
        id,
        request.bookmarked,
    )
    .await;

    Ok(Json(result))
}

#[get("/bookmarks")]
pub async fn api_get_bookmarks(
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<BookmarkListing>, ApiError> {
    user.require_permission(Permission::ManageOwnBookmarks)
        .validate_custom()?;

    let listing = bookmark_listing(db, &user.id).await.validate_custom()?;

    Ok(Json(listing))
}

#[get("/notifications")]
pub async fn api_get_notifications(
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    user.require_permission(Permission::ReadOwnNotifications)
        .validate_custom()?;

    let notifications = db::get_notifications_for_user(db, &user.id, INBOX_LIMIT)
        .await
        .validate_custom()?;

    Ok(Json(notifications))
}

#[put("/notifications/<id>/read")]
pub async fn api_mark_notification_read(
    id: &str,
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<SuccessResponse>, ApiError> {
    user.require_permission(Permission::ReadOwnNotifications)
        .validate_custom()?;

    db::mark_notification_read(db, &user.id, id)
        .await
        .validate_custom()?;

    Ok(Json(SuccessResponse::ok()))
}

#[derive(Serialize, Deserialize)]
pub struct SendNotificationRequest {
    #[serde(flatten)]
    pub draft: NotificationDraft,
    pub target: Target,
}

#[derive(Serialize, Deserialize)]
pub struct SendNotificationResponse {
    pub created: u64,
}

#[post("/notifications", data = "<request>")]
pub async fn api_send_notification(
    request: Json<SendNotificationRequest>,
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<SendNotificationResponse>>, ApiError> {
    user.require_permission(Permission::SendNotifications)
        .validate_custom()?;

    let created = dispatch(db, &request.draft, &request.target)
        .await
        .validate_custom()?;

    info!(sender = %user.id, created, "Notification dispatched");

    Ok(Custom(Status::Created, Json(SendNotificationResponse { created })))
}

#[get("/notifications/recipients?<role>")]
pub async fn api_preview_recipients(
    role: Role,
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<RecipientPreview>, ApiError> {
    user.require_permission(Permission::SendNotifications)
        .validate_custom()?;

    let preview = preview_recipients(db, role).await.validate_custom()?;

    Ok(Json(preview))
}

#[get("/notifications/assignment-options")]
pub async fn api_assignment_options(
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<AssignmentOption>>, ApiError> {
    user.require_permission(Permission::SendNotifications)
        .validate_custom()?;

    let options = assignment_options(db).await.validate_custom()?;

    Ok(Json(options))
}

#[get("/schedule")]
pub async fn api_get_schedule(
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<ScheduleDay>>, ApiError> {
    user.require_permission(Permission::EditOwnSchedule)
        .validate_custom()?;

    let week = weekly_schedule(db, &user.id).await.validate_custom()?;

    Ok(Json(week))
}

#[put("/schedule", data = "<entry>")]
pub async fn api_save_schedule(
    entry: Json<ScheduleInput>,
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<ScheduleDay>>, ApiError> {
    user.require_permission(Permission::EditOwnSchedule)
        .validate_custom()?;

    let week = save_entry(db, &user.id, &entry).await.validate_custom()?;

    Ok(Json(week))
}

#[get("/schools")]
pub async fn api_get_schools(
    _user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<School>>, ApiError> {
    let schools = db::get_schools(db).await.validate_custom()?;
    Ok(Json(schools))
}

#[derive(Deserialize, Validate)]
pub struct CreateSchoolRequest {
    #[validate(length(min = 1, max = 200, message = "School name must be 1 to 200 characters"))]
    name: String,
}

#[post("/admin/schools", data = "<request>")]
pub async fn api_create_school(
    request: Json<CreateSchoolRequest>,
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<Vec<School>>>, ApiError> {
    user.require_permission(Permission::ManageSchools)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    let schools = create_school(db, &user.id, &validated.name)
        .await
        .validate_custom()?;

    Ok(Custom(Status::Created, Json(schools)))
}

#[get("/profile")]
pub async fn api_get_profile(
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UserProfile>, ApiError> {
    user.require_permission(Permission::EditOwnProfile)
        .validate_custom()?;

    let profile = load_profile(db, &user.id).await.validate_custom()?;

    Ok(Json(profile))
}

#[put("/profile", data = "<profile>")]
pub async fn api_save_profile(
    profile: Json<ProfileInput>,
    user: SessionUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UserProfile>, ApiError> {
    user.require_permission(Permission::EditOwnProfile)
        .validate_custom()?;

    let saved = save_profile(db, &user.id, &profile)
        .await
        .validate_custom()?;

    Ok(Json(saved))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

#[derive(Serialize, Deserialize)]
pub struct AuthCallbackPayload {
    pub event: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Revalidates the cookie session. A missing session is not an error here.
#[get("/callback")]
pub async fn auth_callback(
    session: Result<SessionContext, Status>,
) -> Custom<Json<SuccessResponse>> {
    revalidated(session)
}

#[post("/callback", data = "<payload>")]
pub async fn auth_callback_event(
    payload: Option<Json<AuthCallbackPayload>>,
    session: Result<SessionContext, Status>,
    cookies: &CookieJar<'_>,
    identity: &State<SharedIdentity>,
    config: &State<AppConfig>,
) -> Custom<Json<SuccessResponse>> {
    let Some(payload) = payload.map(Json::into_inner) else {
        return revalidated(session);
    };

    match payload.event.as_str() {
        "SIGNED_IN" | "TOKEN_REFRESHED" => {
            let (Some(access_token), Some(refresh_token)) =
                (payload.access_token, payload.refresh_token)
            else {
                return Custom(
                    Status::BadRequest,
                    Json(SuccessResponse::failed("Tokens are required for this event")),
                );
            };

            match identity.get_user(&access_token).await {
                Ok(user) => {
                    store_tokens(cookies, &access_token, &refresh_token, config.refresh_token_ttl);
                    info!(user_id = %user.id, event = %payload.event, "Session installed from callback");
                    Custom(Status::Ok, Json(SuccessResponse::ok()))
                }
                Err(err) => {
                    warn!(error = %err, "Callback tokens rejected");
                    Custom(Status::Unauthorized, Json(SuccessResponse::failed(err.to_string())))
                }
            }
        }
        "SIGNED_OUT" => {
            clear_session(cookies);
            Custom(Status::Ok, Json(SuccessResponse::ok()))
        }
        _ => revalidated(session),
    }
}

fn revalidated(session: Result<SessionContext, Status>) -> Custom<Json<SuccessResponse>> {
    match session {
        Ok(_) => Custom(Status::Ok, Json(SuccessResponse::ok())),
        Err(status) if status == Status::Unauthorized => {
            Custom(Status::Ok, Json(SuccessResponse::ok()))
        }
        Err(status) => Custom(
            Status::InternalServerError,
            Json(SuccessResponse::failed(format!(
                "Session check failed: {}",
                status.reason_lossy()
            ))),
        ),
    }
}

#[derive(Responder)]
pub struct StoredObjectResponse {
    body: Vec<u8>,
    content_type: ContentType,
    cache_control: Header<'static>,
}

#[get("/<bucket>/<path..>")]
pub async fn serve_object(
    bucket: &str,
    path: std::path::PathBuf,
    storage: &State<SharedStorage>,
) -> Result<StoredObjectResponse, ApiError> {
    let key = path.to_string_lossy().replace('\\', "/");
    let object = storage.download(bucket, &key).await.validate_custom()?;

    let content_type = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ContentType::from_extension)
        .unwrap_or(ContentType::Binary);
    let cache_control = match object.meta {
        Some(meta) => format!("max-age={}", meta.cache_control_secs),
        None => "no-cache".to_string(),
    };

    Ok(StoredObjectResponse {
        body: object.bytes,
        content_type,
        cache_control: Header::new("Cache-Control", cache_control),
    })
}
