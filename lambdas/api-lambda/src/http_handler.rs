use agosh_shared::auth::{self, Caller, SessionKeys};
use agosh_shared::error::{AppError, AppResult};
use agosh_shared::types::{Role, UpdateDonationRequest, UpdateNeedRequest};
use agosh_shared::{branches, dashboard, donations, needs, response, students, users, AppState};
use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

const RESOURCES: [&str; 8] = [
    "health",
    "auth",
    "users",
    "branches",
    "students",
    "donations",
    "needs",
    "dashboard",
];

/// Successful outcome of a routed request, rendered into an envelope.
struct Reply {
    status: StatusCode,
    data: Value,
    message: &'static str,
}

impl Reply {
    fn ok<T: Serialize>(data: T, message: &'static str) -> AppResult<Option<Reply>> {
        Self::with_status(StatusCode::OK, data, message)
    }

    fn created<T: Serialize>(data: T, message: &'static str) -> AppResult<Option<Reply>> {
        Self::with_status(StatusCode::CREATED, data, message)
    }

    fn with_status<T: Serialize>(
        status: StatusCode,
        data: T,
        message: &'static str,
    ) -> AppResult<Option<Reply>> {
        let data = serde_json::to_value(data).map_err(|e| AppError::Encoding(e.to_string()))?;
        Ok(Some(Reply { status, data, message }))
    }
}

/// Main Lambda handler - routes every REST request
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    let allow_origin = state.config.cors_allow_origin.as_str();
    tracing::info!("API invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == Method::OPTIONS {
        return response::preflight(allow_origin);
    }

    match route(&event, &state).await {
        Ok(Some(reply)) => response::success(reply.status, reply.data, reply.message, allow_origin),
        Ok(None) => {
            tracing::warn!("⚠️ No route matched - Method: {} Path: {}", method, path);
            response::not_found(allow_origin)
        }
        Err(err) => response::failure(&err, allow_origin),
    }
}

async fn route(event: &Request, state: &AppState) -> AppResult<Option<Reply>> {
    let method = event.method();
    let parts: Vec<&str> = event.uri().path().split('/').filter(|s| !s.is_empty()).collect();
    let store = state.store.as_ref();
    let files = state.files.as_ref();

    match parts.first() {
        Some(resource) if RESOURCES.contains(resource) => {}
        _ => return Ok(None),
    }

    // Public routes
    match (method, parts.as_slice()) {
        (&Method::GET, ["health"]) => return Reply::ok("ok", "Service is healthy."),
        (&Method::POST, ["auth", "register"]) => {
            let profile = users::register_donor(store, parse(event)?).await?;
            return Reply::created(profile, "Registration successful.");
        }
        (&Method::POST, ["auth", "login"]) => {
            let session = users::login(store, &state.sessions, parse(event)?).await?;
            return Reply::ok(session, "Login successful.");
        }
        (&Method::GET, ["branches"]) => {
            return Reply::ok(branches::list_all(store).await?, "Branches fetched successfully.")
        }
        (&Method::GET, ["branches", id]) => {
            return Reply::ok(branches::get_by_id(store, id).await?, "Branch fetched successfully.")
        }
        _ => {}
    }

    let user_id = caller_identity(event, &state.sessions)?;
    let caller = auth::resolve_caller(store, user_id.as_deref()).await?;
    let caller = &caller;

    match (method, parts.as_slice()) {
        // Users
        (&Method::GET, ["users", "me"]) => {
            Reply::ok(users::me(caller), "Profile fetched successfully.")
        }
        (&Method::PUT, ["users", "me"]) => {
            Reply::ok(
                users::update_me(store, caller, parse(event)?).await?,
                "Profile updated successfully.",
            )
        }
        (&Method::GET, ["users"]) => {
            let role = match query(event, "role") {
                Some(raw) => Some(
                    Role::parse(&raw)
                        .ok_or_else(|| AppError::validation(format!("Unknown role {}.", raw)))?,
                ),
                None => None,
            };
            Reply::ok(users::list(store, caller, role).await?, "Users fetched successfully.")
        }
        (&Method::GET, ["users", id]) => {
            Reply::ok(users::get(store, caller, id).await?, "User fetched successfully.")
        }
        (&Method::PUT, ["users", id]) => {
            Reply::ok(
                users::update(store, caller, id, parse(event)?).await?,
                "User updated successfully.",
            )
        }
        (&Method::DELETE, ["users", id]) => {
            Reply::ok(users::delete(store, caller, id).await?, "User deleted successfully.")
        }

        // Branches
        (&Method::POST, ["branches"]) => {
            Reply::created(
                branches::create(store, caller, parse(event)?).await?,
                "Branch created successfully.",
            )
        }
        (&Method::PUT, ["branches", id]) => {
            Reply::ok(
                branches::update(store, caller, id, parse(event)?).await?,
                "Branch updated successfully.",
            )
        }
        (&Method::DELETE, ["branches", id]) => {
            Reply::ok(branches::delete(store, caller, id).await?, "Branch deleted successfully.")
        }

        // Students
        (&Method::GET, ["students"]) => {
            let branch = query(event, "branch");
            Reply::ok(
                students::list_all(store, caller, branch.as_deref()).await?,
                "Students fetched successfully.",
            )
        }
        (&Method::POST, ["students"]) => {
            Reply::created(
                students::create(store, caller, parse(event)?).await?,
                "Student created successfully.",
            )
        }
        (&Method::GET, ["students", "branch", branch_id]) => Reply::ok(
            students::list_by_branch(store, caller, branch_id).await?,
            "Students fetched successfully.",
        ),
        (&Method::GET, ["students", id]) => {
            Reply::ok(
                students::get_by_id(store, caller, id).await?,
                "Student fetched successfully.",
            )
        }
        (&Method::PUT, ["students", id]) => {
            Reply::ok(
                students::update(store, caller, id, parse(event)?).await?,
                "Student updated successfully.",
            )
        }
        (&Method::DELETE, ["students", id]) => {
            Reply::ok(students::delete(store, caller, id).await?, "Student deleted successfully.")
        }

        // Donations
        (&Method::POST, ["donations"]) => Reply::created(
            donations::create(store, files, caller, parse(event)?).await?,
            "Donation created successfully.",
        ),
        (&Method::GET, ["donations"]) => {
            Reply::ok(donations::list_all(store, caller).await?, "Donations fetched successfully.")
        }
        (&Method::GET, ["donations", "donor", donor_id]) => Reply::ok(
            donations::list_by_donor(store, caller, donor_id).await?,
            "Donations fetched successfully.",
        ),
        (&Method::GET, ["donations", "branch", branch_id]) => Reply::ok(
            donations::list_by_branch(store, caller, branch_id).await?,
            "Donations fetched successfully.",
        ),
        (&Method::GET, ["donations", id]) => {
            Reply::ok(
                donations::get_by_id(store, caller, id).await?,
                "Donation fetched successfully.",
            )
        }
        (&Method::PUT, ["donations", id]) => {
            let req: UpdateDonationRequest = parse(event)?;
            let donation = match req.status {
                Some(status) if is_status_only(&req) => {
                    donations::update_status(store, caller, id, status).await?
                }
                _ => donations::update(store, files, caller, id, req).await?,
            };
            Reply::ok(donation, "Donation updated successfully.")
        }
        (&Method::DELETE, ["donations", id]) => {
            Reply::ok(donations::delete(store, caller, id).await?, "Donation deleted successfully.")
        }

        // Needs
        (&Method::POST, ["needs"]) => {
            Reply::created(
                needs::create(store, caller, parse(event)?).await?,
                "Need submitted successfully.",
            )
        }
        (&Method::GET, ["needs"]) => {
            Reply::ok(needs::list_all(store, caller).await?, "Needs fetched successfully.")
        }
        (&Method::GET, ["needs", "branch", branch_id]) => Reply::ok(
            needs::list_by_branch(store, caller, branch_id).await?,
            "Needs fetched successfully.",
        ),
        (&Method::GET, ["needs", id]) => {
            Reply::ok(needs::get_by_id(store, caller, id).await?, "Need fetched successfully.")
        }
        (&Method::PUT, ["needs", id]) => {
            let req: UpdateNeedRequest = parse(event)?;
            let need = match (caller, req.status) {
                (Caller::HeadOffice(_), Some(status)) if !req.has_content_changes() => {
                    needs::set_status(store, caller, id, status).await?
                }
                _ => needs::update(store, caller, id, req).await?,
            };
            Reply::ok(need, "Need updated successfully.")
        }
        (&Method::DELETE, ["needs", id]) => {
            Reply::ok(needs::delete(store, caller, id).await?, "Need deleted successfully.")
        }

        // Dashboards
        (&Method::GET, ["dashboard"]) => {
            Reply::ok(
                dashboard::for_caller(store, caller).await?,
                "Dashboard data fetched successfully.",
            )
        }
        (&Method::GET, ["dashboard", "admin"]) => {
            Reply::ok(
                dashboard::head_office(store, caller).await?,
                "Dashboard data fetched successfully.",
            )
        }
        (&Method::GET, ["dashboard", "branch-admin"]) => {
            Reply::ok(
                dashboard::branch_admin(store, caller).await?,
                "Dashboard data fetched successfully.",
            )
        }
        (&Method::GET, ["dashboard", "donor"]) => {
            Reply::ok(
                dashboard::donor(store, caller).await?,
                "Dashboard data fetched successfully.",
            )
        }

        _ => Ok(None),
    }
}

/// User id of the caller. API Gateway JWT claims are already verified by the
/// gateway; otherwise a bearer session token must verify against our keys.
fn caller_identity(event: &Request, sessions: &SessionKeys) -> AppResult<Option<String>> {
    let gateway_subject = event
        .request_context_ref()
        .and_then(|ctx| ctx.authorizer())
        .and_then(|auth| auth.jwt.as_ref())
        .and_then(|jwt| jwt.claims.get("sub"))
        .map(|s| s.to_string());
    if gateway_subject.is_some() {
        return Ok(gateway_subject);
    }

    let header = match event.headers().get("Authorization") {
        Some(header) => header
            .to_str()
            .map_err(|_| AppError::Authentication("Malformed Authorization header.".to_string()))?,
        None => return Ok(None),
    };
    match header.strip_prefix("Bearer ") {
        Some(token) => sessions.verify(token).map(Some),
        None => Err(AppError::Authentication(
            "Authorization header must carry a Bearer token.".to_string(),
        )),
    }
}

fn parse<T: DeserializeOwned>(event: &Request) -> AppResult<T> {
    let body: &[u8] = event.body().as_ref();
    if body.is_empty() {
        return Err(AppError::validation("Request body is required."));
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::validation(format!("Invalid request body: {}", e)))
}

fn query(event: &Request, name: &str) -> Option<String> {
    event
        .query_string_parameters_ref()
        .and_then(|params| params.first(name))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn is_status_only(req: &UpdateDonationRequest) -> bool {
    req.amount.is_none()
        && req.notes.is_none()
        && req.receipt_image.is_none()
        && req.receipt_file.is_none()
        && req.student.is_none()
}
