use crate::auth::{bearer_token, AuthUser};
use crate::error::ApiError;
use crate::repository::{TodoChanges, TodoRecord, UserRecord};
use crate::AppState;
use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse, Json};
use domain::{string_or_number, validate_email, validate_password, validate_title};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::AppError;
use tracing::info;

/// ユーザー情報（パスワードハッシュは含めない）
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: u64,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<UserRecord> for UserView {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    email: Option<String>,
    password: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SigninResponse {
    success: bool,
    token: String,
    email: String,
    message: &'static str,
    user: UserView,
}

#[derive(Debug, Deserialize)]
pub struct CreateTodoRequest {
    title: Option<String>,
    #[serde(default)]
    completed: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTodoRequest {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    title: Option<String>,
    completed: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteTodoRequest {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
}

fn required(value: Option<String>, message: &str) -> Result<String, ApiError> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(message))
}

/// 数値でない ID は存在しない Todo として扱う
fn todo_id(raw: &str) -> Result<u64, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::not_found(format!("Todo {raw} not found")))
}

fn issue_token(state: &AppState, user: &UserRecord) -> Result<String, ApiError> {
    state
        .tokens
        .issue(&user.id.to_string(), &user.email)
        .map_err(|e| ApiError(AppError::Internal(format!("failed to sign token: {e}"))))
}

/// ヘルスチェック
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// POST /api/v1/user/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    const MISSING: &str = "Email and password are required";
    let email = validate_email(&required(req.email, MISSING)?)?;
    let password = validate_password(&required(req.password, MISSING)?)?;
    let name = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty());

    let hash = state.passwords.hash_off_runtime(password).await?;
    let user = state.repo.create_user(&email, name, &hash)?;
    info!(user_id = user.id, "ユーザーを登録しました");

    Ok((StatusCode::CREATED, Json(UserView::from(user))))
}

/// POST /api/v1/user/signin
pub async fn signin(
    State(state): State<AppState>,
    Json(req): Json<SigninRequest>,
) -> Result<Json<SigninResponse>, ApiError> {
    const MISSING: &str = "Email and password are required";
    let email = required(req.email, MISSING)?;
    let password = required(req.password, MISSING)?;

    let user = state
        .repo
        .find_user_by_email(email.trim())?
        .ok_or_else(|| ApiError::unauthorized("Incorrect Credentials"))?;
    let matched = state
        .passwords
        .verify_off_runtime(password, user.password_hash.clone())
        .await;
    if !matched {
        return Err(ApiError::unauthorized("Incorrect Credentials"));
    }

    let token = issue_token(&state, &user)?;
    info!(user_id = user.id, "サインインしました");

    Ok(Json(SigninResponse {
        success: true,
        token,
        email: user.email.clone(),
        message: "Login successful",
        user: user.into(),
    }))
}

/// GET /api/v1/user/validate-token
pub async fn validate_token(user: AuthUser) -> impl IntoResponse {
    Json(json!({ "success": true, "user": { "id": user.id, "email": user.email } }))
}

/// POST /api/v1/user/refresh
///
/// 署名が正しく、期限切れからリフレッシュ猶予内のトークンを新しいトークンに交換する。
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::unauthorized("Missing or malformed token"))?;
    let claims = state.tokens.verify_for_refresh(token)?;

    let user_id = claims
        .sub
        .parse()
        .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;
    let user = state
        .repo
        .find_user(user_id)?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;

    let token = issue_token(&state, &user)?;
    info!(user_id = user.id, "トークンを再発行しました");
    Ok(Json(json!({ "success": true, "token": token })))
}

/// GET /api/v1/todo
pub async fn list_todos(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<TodoRecord>>, ApiError> {
    Ok(Json(state.repo.list_todos(user.id)?))
}

/// POST /api/v1/todo
pub async fn create_todo(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateTodoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = validate_title(req.title.as_deref().unwrap_or_default())?;
    let todo = state.repo.create_todo(user.id, &title, req.completed)?;
    info!(user_id = user.id, todo_id = todo.id, "Todo を作成しました");
    Ok((StatusCode::CREATED, Json(todo)))
}

/// PUT /api/v1/todo
pub async fn update_todo(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UpdateTodoRequest>,
) -> Result<Json<TodoRecord>, ApiError> {
    let id = todo_id(&req.id)?;
    let changes = TodoChanges {
        title: req.title.as_deref().map(validate_title).transpose()?,
        completed: req.completed,
    };
    let todo = state.repo.update_todo(user.id, id, changes)?;
    Ok(Json(todo))
}

/// DELETE /api/v1/todo
pub async fn delete_todo(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<DeleteTodoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = todo_id(&req.id)?;
    state.repo.delete_todo(user.id, id)?;
    info!(user_id = user.id, todo_id = id, "Todo を削除しました");
    Ok(Json(json!({ "message": "Todo deleted" })))
}
