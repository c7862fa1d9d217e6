use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use nuancier_shared::{Action, Role, Section};
use nuancier_store::{
    parse_identity_list, Color, ColorGallery, ColorGroup, ColorId, ColorImage, ColorSummary,
    GroupPatch, ImageId, ImagePatch, NewGroup, SectionCatalog, User, UserId, UserPatch,
};
use serde::{Deserialize, Deserializer, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::accounts::{Accounts, NewAccount};
use crate::auth;
use crate::catalog::{Catalog, UploadedFile};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::media_store::content_type_for;

/// Upper bound on files accepted by one gallery upload request.
const MAX_FILES_PER_UPLOAD: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub accounts: Arc<Accounts>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    async fn staff(&self, headers: &HeaderMap, action: Action) -> Result<User, ServerError> {
        auth::staff(&self.accounts, headers, &self.config.auth_email_header, action).await
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let body_limit = state
        .config
        .max_upload_size
        .saturating_mul(MAX_FILES_PER_UPLOAD);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/catalog", get(catalog_overview))
        .route("/api/groups", get(list_groups).post(create_group))
        .route("/api/groups/reorder", patch(reorder_groups))
        .route("/api/groups/:slug", patch(update_group).delete(delete_group))
        .route("/api/groups/:slug/colors", post(create_color))
        .route("/api/groups/:slug/colors/reorder", patch(reorder_group_colors))
        .route("/api/colors", get(list_colors))
        .route("/api/colors/:id", patch(update_color).delete(delete_color))
        .route(
            "/api/colors/:id/images",
            get(color_images).post(upload_images).patch(arrange_images),
        )
        .route(
            "/api/colors/:id/images/:image_id",
            patch(update_image).delete(delete_image),
        )
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/:id", patch(update_user).delete(delete_user))
        .route("/api/password/forgot", post(forgot_password))
        .route("/api/password/reset", post(reset_password))
        .route("/api/password/change", post(change_password))
        .route("/media/*key", get(media_file))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

const OK: Json<OkResponse> = Json(OkResponse { ok: true });

#[derive(Serialize)]
struct DeletedGroupResponse {
    deleted: bool,
    orphaned_colors: usize,
}

#[derive(Deserialize)]
struct SectionQuery {
    section: Option<String>,
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    name: String,
    section: Option<String>,
}

#[derive(Deserialize)]
struct UpdateGroupRequest {
    name: Option<String>,
    position: Option<i64>,
}

#[derive(Deserialize)]
struct CreateColorRequest {
    name: String,
}

#[derive(Deserialize)]
struct ReorderRequest {
    order: serde_json::Value,
}

#[derive(Deserialize)]
struct ReorderGroupsRequest {
    section: String,
    order: serde_json::Value,
}

#[derive(Deserialize)]
struct UpdateColorRequest {
    name: Option<String>,
    position: Option<i64>,
    /// Absent: keep the group.  `null`: detach.  A slug: move there.
    #[serde(default, deserialize_with = "present")]
    group_slug: Option<Option<String>>,
}

#[derive(Deserialize)]
struct ArrangeImagesRequest {
    order: Option<serde_json::Value>,
    presentation_id: Option<ImageId>,
}

#[derive(Deserialize)]
struct UpdateImageRequest {
    alt: Option<String>,
    is_presentation: Option<bool>,
}

#[derive(Deserialize)]
struct CreateUserRequest {
    email: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    role: Option<String>,
}

#[derive(Deserialize)]
struct UpdateUserRequest {
    first_name: Option<String>,
    last_name: Option<String>,
    role: Option<String>,
    is_active: Option<bool>,
    #[serde(default)]
    reset_password: bool,
}

#[derive(Deserialize)]
struct ForgotPasswordRequest {
    email: String,
}

#[derive(Deserialize)]
struct ResetPasswordRequest {
    uid: UserId,
    token: String,
    new_password: String,
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

/// Tell a field sent as `null` apart from a missing one.
fn present<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

fn parse_section(raw: &str) -> Result<Section, ServerError> {
    raw.parse::<Section>()
        .map_err(|e| ServerError::BadRequest(e.to_string()))
}

fn parse_role(raw: &str) -> Result<Role, ServerError> {
    raw.trim()
        .to_ascii_uppercase()
        .parse::<Role>()
        .map_err(|e| ServerError::BadRequest(e.to_string()))
}

fn parse_order(value: &serde_json::Value) -> Result<Vec<i64>, ServerError> {
    Ok(parse_identity_list(value)?)
}

fn truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

// ---------------------------------------------------------------------------
// Catalog handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn catalog_overview(
    State(state): State<AppState>,
) -> Result<Json<Vec<SectionCatalog>>, ServerError> {
    Ok(Json(state.catalog.overview().await?))
}

async fn list_groups(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SectionQuery>,
) -> Result<Json<Vec<ColorGroup>>, ServerError> {
    state.staff(&headers, Action::ViewDashboard).await?;
    if query.section.as_deref().map(str::trim) == Some("all") {
        return Ok(Json(state.catalog.all_groups().await?));
    }
    let section = Section::parse_or_default(query.section.as_deref());
    Ok(Json(state.catalog.groups(section).await?))
}

async fn create_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateGroupRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServerError> {
    state.staff(&headers, Action::ManageCatalog).await?;
    let Json(req) = payload?;
    let section = match req.section.as_deref() {
        Some(raw) => parse_section(raw)?,
        None => Section::default(),
    };
    let group = state
        .catalog
        .create_group(&NewGroup {
            name: req.name,
            section,
            position: None,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn update_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    payload: Result<Json<UpdateGroupRequest>, JsonRejection>,
) -> Result<Json<ColorGroup>, ServerError> {
    state.staff(&headers, Action::ManageCatalog).await?;
    let Json(req) = payload?;
    let patch = GroupPatch {
        name: req.name,
        position: req.position,
    };
    Ok(Json(state.catalog.update_group(&slug, &patch).await?))
}

async fn delete_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<DeletedGroupResponse>, ServerError> {
    state.staff(&headers, Action::ManageCatalog).await?;
    let orphaned_colors = state.catalog.delete_group(&slug).await?;
    Ok(Json(DeletedGroupResponse {
        deleted: true,
        orphaned_colors,
    }))
}

async fn reorder_groups(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ReorderGroupsRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, ServerError> {
    state.staff(&headers, Action::ManageCatalog).await?;
    let Json(req) = payload?;
    let section = parse_section(&req.section)?;
    let ids = parse_order(&req.order)?;
    state.catalog.reorder_groups(section, &ids).await?;
    Ok(OK)
}

async fn create_color(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    payload: Result<Json<CreateColorRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServerError> {
    state.staff(&headers, Action::ManageCatalog).await?;
    let Json(req) = payload?;
    let color = state.catalog.create_color(&slug, &req.name).await?;
    Ok((StatusCode::CREATED, Json(color)))
}

async fn reorder_group_colors(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    payload: Result<Json<ReorderRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, ServerError> {
    state.staff(&headers, Action::ManageCatalog).await?;
    let Json(req) = payload?;
    let ids = parse_order(&req.order)?;
    state.catalog.reorder_group_colors(&slug, &ids).await?;
    Ok(OK)
}

async fn list_colors(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ColorSummary>>, ServerError> {
    state.staff(&headers, Action::ViewDashboard).await?;
    Ok(Json(state.catalog.colors().await?))
}

async fn update_color(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ColorId>,
    payload: Result<Json<UpdateColorRequest>, JsonRejection>,
) -> Result<Json<Color>, ServerError> {
    state.staff(&headers, Action::ManageCatalog).await?;
    let Json(req) = payload?;
    let color = state
        .catalog
        .update_color(id, req.name, req.position, req.group_slug)
        .await?;
    Ok(Json(color))
}

async fn delete_color(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ColorId>,
) -> Result<StatusCode, ServerError> {
    state.staff(&headers, Action::ManageCatalog).await?;
    state.catalog.delete_color(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn color_images(
    State(state): State<AppState>,
    Path(id): Path<ColorId>,
) -> Result<Json<ColorGallery>, ServerError> {
    Ok(Json(state.catalog.gallery(id).await?))
}

async fn upload_images(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ColorId>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ServerError> {
    state.staff(&headers, Action::ManageCatalog).await?;

    let mut files = Vec::new();
    let mut is_presentation = false;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "files" | "file" => {
                if files.len() == MAX_FILES_PER_UPLOAD {
                    return Err(ServerError::BadRequest(format!(
                        "at most {MAX_FILES_PER_UPLOAD} files per upload"
                    )));
                }
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
                files.push(UploadedFile { file_name, data });
            }
            "is_presentation" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
                is_presentation = truthy(&value);
            }
            _ => {}
        }
    }

    if files.is_empty() {
        return Err(ServerError::BadRequest(
            "Missing 'files' field in multipart form".to_string(),
        ));
    }

    let images = state.catalog.upload_images(id, files, is_presentation).await?;
    Ok((StatusCode::CREATED, Json(images)))
}

/// Either reorder the gallery (`order`) or pick the presentation image
/// (`presentation_id`).
async fn arrange_images(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ColorId>,
    payload: Result<Json<ArrangeImagesRequest>, JsonRejection>,
) -> Result<Json<ColorGallery>, ServerError> {
    state.staff(&headers, Action::ManageCatalog).await?;
    let Json(req) = payload?;
    match (req.order, req.presentation_id) {
        (Some(order), None) => {
            let ids = parse_order(&order)?;
            state.catalog.reorder_gallery(id, &ids).await?;
        }
        (None, Some(image_id)) => {
            state.catalog.set_presentation(id, image_id).await?;
        }
        _ => {
            return Err(ServerError::BadRequest(
                "send exactly one of 'order' or 'presentation_id'".into(),
            ))
        }
    }
    Ok(Json(state.catalog.gallery(id).await?))
}

async fn update_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, image_id)): Path<(ColorId, ImageId)>,
    payload: Result<Json<UpdateImageRequest>, JsonRejection>,
) -> Result<Json<ColorImage>, ServerError> {
    state.staff(&headers, Action::ManageCatalog).await?;
    let Json(req) = payload?;
    let patch = ImagePatch {
        alt: req.alt,
        is_presentation: req.is_presentation,
    };
    Ok(Json(state.catalog.update_image(id, image_id, &patch).await?))
}

async fn delete_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, image_id)): Path<(ColorId, ImageId)>,
) -> Result<StatusCode, ServerError> {
    state.staff(&headers, Action::ManageCatalog).await?;
    state.catalog.delete_image(id, image_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn media_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let data = state.catalog.media().read(&key).await?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&key))], data))
}

// ---------------------------------------------------------------------------
// Account handlers
// ---------------------------------------------------------------------------

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<User>>, ServerError> {
    state.staff(&headers, Action::ManageUsers).await?;
    Ok(Json(state.accounts.list().await?))
}

async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServerError> {
    let admin = state.staff(&headers, Action::ManageUsers).await?;
    let Json(req) = payload?;
    let role = match req.role.as_deref() {
        Some(raw) => parse_role(raw)?,
        None => Role::default(),
    };
    let user = state
        .accounts
        .create(NewAccount {
            email: req.email,
            first_name: req.first_name,
            last_name: req.last_name,
            role,
        })
        .await?;
    info!(by = %admin.email, user_id = %user.id, "account created");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<UserId>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<User>, ServerError> {
    state.staff(&headers, Action::ManageUsers).await?;
    let Json(req) = payload?;
    let patch = UserPatch {
        first_name: req.first_name,
        last_name: req.last_name,
        role: req.role.as_deref().map(parse_role).transpose()?,
        is_active: req.is_active,
    };
    let mut user = state.accounts.update(id, &patch).await?;
    if req.reset_password {
        user = state.accounts.issue_temporary_password(id).await?;
    }
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<UserId>,
) -> Result<StatusCode, ServerError> {
    let admin = state.staff(&headers, Action::ManageUsers).await?;
    state.accounts.delete(&admin, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn forgot_password(
    State(state): State<AppState>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServerError> {
    let Json(req) = payload?;
    state.accounts.forgot_password(&req.email).await?;
    Ok((StatusCode::ACCEPTED, OK))
}

async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, ServerError> {
    let Json(req) = payload?;
    state
        .accounts
        .reset_password(req.uid, &req.token, &req.new_password)
        .await?;
    Ok(OK)
}

async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, ServerError> {
    let user = auth::signed_in(&state.accounts, &headers, &state.config.auth_email_header).await?;
    let Json(req) = payload?;
    state
        .accounts
        .change_password(&user, &req.current_password, &req.new_password)
        .await?;
    Ok(OK)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use nuancier_store::{Database, NewUser};
    use serde_json::{json, Value};
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    use super::*;
    use crate::accounts::test_support::RecordingMailer;
    use crate::accounts::{Argon2Hasher, PasswordHasher};
    use crate::media_store::MediaStore;

    const ADMIN: &str = "admin@example.com";
    const MANAGER: &str = "manager@example.com";

    struct Harness {
        router: Router,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let hash = Argon2Hasher.hash("initial secret").unwrap();
        for (email, role) in [(ADMIN, Role::Admin), (MANAGER, Role::Manager)] {
            let user = db
                .create_user(&NewUser {
                    email: email.into(),
                    first_name: String::new(),
                    last_name: String::new(),
                    role,
                    password_hash: hash.clone(),
                })
                .unwrap();
            db.set_password(user.id, &hash, false).unwrap();
        }

        let config = Arc::new(ServerConfig {
            media_root: dir.path().join("media"),
            ..ServerConfig::default()
        });
        let db = Arc::new(Mutex::new(db));
        let media = MediaStore::new(config.media_root.clone(), "/media".into(), 1024)
            .await
            .unwrap();
        let state = AppState {
            catalog: Catalog::new(db.clone(), Arc::new(media)),
            accounts: Arc::new(Accounts::new(
                db,
                Arc::new(Argon2Hasher),
                Arc::new(RecordingMailer::default()),
                config.clone(),
            )),
            config,
        };
        Harness {
            router: build_router(state),
            _dir: dir,
        }
    }

    impl Harness {
        async fn send(
            &self,
            method: &str,
            uri: &str,
            who: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some(email) = who {
                req = req.header("x-auth-email", email);
            }
            let req = match body {
                Some(json) => req
                    .header("content-type", "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => req.body(Body::empty()).unwrap(),
            };
            self.dispatch(req).await
        }

        async fn dispatch(&self, req: Request<Body>) -> (StatusCode, Value) {
            let resp = self.router.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, value)
        }
    }

    #[tokio::test]
    async fn health_is_public() {
        let h = harness().await;
        let (status, body) = h.send("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn mutations_require_a_signed_in_user() {
        let h = harness().await;
        let (status, body) = h
            .send("POST", "/api/groups", None, Some(json!({"name": "Blues"})))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = h
            .send("POST", "/api/groups", Some("stranger@example.com"), Some(json!({"name": "Blues"})))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn group_and_color_lifecycle() {
        let h = harness().await;
        let (status, group) = h
            .send("POST", "/api/groups", Some(MANAGER), Some(json!({"name": "Bleus Façade", "section": "plans"})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(group["slug"], "bleus-facade");
        assert_eq!(group["section"], "plans");

        let (status, sky) = h
            .send("POST", "/api/groups/bleus-facade/colors", Some(MANAGER), Some(json!({"name": "Sky"})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(sky["slug"], "sky");

        let (status, body) = h
            .send("POST", "/api/groups/bleus-facade/colors", Some(MANAGER), Some(json!({"name": "SKY"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("SKY"));

        let (_, sky2) = h
            .send("POST", "/api/groups/bleus-facade/colors", Some(MANAGER), Some(json!({"name": "Sky!"})))
            .await;
        assert_eq!(sky2["slug"], "sky-2");

        let order = json!({"order": [sky2["id"], sky["id"]]});
        let (status, _) = h
            .send("PATCH", "/api/groups/bleus-facade/colors/reorder", Some(MANAGER), Some(order))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, catalog) = h.send("GET", "/api/catalog", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let colors = &catalog[1]["groups"][0]["colors"];
        assert_eq!(colors[0]["name"], "Sky!");
        assert_eq!(colors[1]["name"], "Sky");

        let uri = format!("/api/colors/{}", sky["id"]);
        let (status, moved) = h
            .send("PATCH", &uri, Some(MANAGER), Some(json!({"group_slug": null})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(moved["group_id"].is_null());

        let (status, body) = h.send("DELETE", "/api/groups/bleus-facade", Some(MANAGER), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["orphaned_colors"], 1);
    }

    #[tokio::test]
    async fn malformed_bodies_are_bad_requests() {
        let h = harness().await;
        let (status, body) = h.send("POST", "/api/groups", Some(MANAGER), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("name"));

        h.send("POST", "/api/groups", Some(MANAGER), Some(json!({"name": "Blues"}))).await;
        let (status, body) = h
            .send("PATCH", "/api/groups/blues/colors/reorder", Some(MANAGER), Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let req = Request::builder()
            .method("POST")
            .uri("/api/groups/blues/colors")
            .header("x-auth-email", MANAGER)
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = h.dispatch(req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        // Sign-in is still checked before the body.
        let (status, _) = h.send("POST", "/api/groups", None, Some(json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn reorder_with_foreign_id_is_rejected() {
        let h = harness().await;
        for name in ["Blues", "Greens"] {
            h.send("POST", "/api/groups", Some(MANAGER), Some(json!({"name": name}))).await;
        }
        let (_, foreign) = h
            .send("POST", "/api/groups/greens/colors", Some(MANAGER), Some(json!({"name": "Moss"})))
            .await;

        let (status, _) = h
            .send(
                "PATCH",
                "/api/groups/blues/colors/reorder",
                Some(MANAGER),
                Some(json!({"order": [foreign["id"]]})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, all) = h.send("GET", "/api/groups?section=all", Some(MANAGER), None).await;
        assert_eq!(all.as_array().unwrap().len(), 2);

        let (status, _) = h
            .send(
                "PATCH",
                "/api/groups/reorder",
                Some(MANAGER),
                Some(json!({"section": "facades", "order": "1,2"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn gallery_upload_and_presentation_switch() {
        let h = harness().await;
        h.send("POST", "/api/groups", Some(MANAGER), Some(json!({"name": "Blues"}))).await;
        let (_, sky) = h
            .send("POST", "/api/groups/blues/colors", Some(MANAGER), Some(json!({"name": "Sky"})))
            .await;

        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"is_presentation\"\r\n\r\ntrue\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"a.jpg\"\r\nContent-Type: image/jpeg\r\n\r\naaa\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"b.jpg\"\r\nContent-Type: image/jpeg\r\n\r\nbbb\r\n\
             --{b}--\r\n",
            b = boundary
        );
        let uri = format!("/api/colors/{}/images", sky["id"]);
        let req = Request::builder()
            .method("POST")
            .uri(&uri)
            .header("x-auth-email", MANAGER)
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let (status, images) = h.dispatch(req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(images[0]["is_presentation"], true);
        assert_eq!(images[1]["is_presentation"], false);

        let media_uri = images[1]["file_url"].as_str().unwrap().to_string();
        let resp = h
            .router
            .clone()
            .oneshot(Request::builder().uri(&media_uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");

        let (status, gallery) = h
            .send("PATCH", &uri, Some(MANAGER), Some(json!({"presentation_id": images[1]["id"]})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(gallery["presentation"]["id"], images[1]["id"]);
        assert_eq!(gallery["gallery"].as_array().unwrap().len(), 1);

        let (status, _) = h
            .send("PATCH", &uri, Some(MANAGER), Some(json!({"order": [images[1]["id"]]})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn user_admin_is_admin_only() {
        let h = harness().await;
        let new_user = json!({"email": "new@example.com", "role": "manager"});

        let (status, _) = h.send("POST", "/api/users", Some(MANAGER), Some(new_user.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, user) = h.send("POST", "/api/users", Some(ADMIN), Some(new_user)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(user["must_change_password"], true);
        assert!(user.get("password_hash").is_none());

        // A fresh account may only change its password.
        let (status, _) = h.send("GET", "/api/colors", Some("new@example.com"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, users) = h.send("GET", "/api/users", Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(users.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn last_admin_cannot_be_demoted() {
        let h = harness().await;
        let (_, users) = h.send("GET", "/api/users", Some(ADMIN), None).await;
        let admin_id = users
            .as_array()
            .unwrap()
            .iter()
            .find(|u| u["email"] == ADMIN)
            .unwrap()["id"]
            .clone();

        let uri = format!("/api/users/{admin_id}");
        let (status, body) = h
            .send("PATCH", &uri, Some(ADMIN), Some(json!({"role": "MANAGER"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("last active administrator"));
    }

    #[tokio::test]
    async fn password_change_is_allowed_while_pending() {
        let h = harness().await;
        let (status, _) = h
            .send(
                "POST",
                "/api/password/change",
                Some(MANAGER),
                Some(json!({"current_password": "initial secret", "new_password": "a better secret"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = h
            .send("POST", "/api/password/forgot", None, Some(json!({"email": "nobody@example.com"})))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
}
