use chrono::Utc;

use crate::auth::{self, Caller, SessionKeys};
use crate::error::{AppError, AppResult};
use crate::store::{self, Filter, Store};
use crate::types::{
    Branch, LoginRequest, LoginResponse, RegisterDonorRequest, Role, UpdateUserRequest, User,
    UserProfile,
};
use crate::validate;

const BAD_CREDENTIALS: &str = "Invalid email or password.";

pub(crate) async fn find_by_email(store: &dyn Store, email: &str) -> AppResult<Option<User>> {
    let mut users = store::fetch_all::<User>(store, &Filter::all().eq("email", email)).await?;
    Ok(users.pop())
}

pub(crate) async fn ensure_email_free(store: &dyn Store, email: &str) -> AppResult<()> {
    if find_by_email(store, email).await?.is_some() {
        return Err(AppError::validation("A user with this email already exists."));
    }
    Ok(())
}

/// Self-service signup. The role is always DONOR.
pub async fn register_donor(
    store: &dyn Store,
    req: RegisterDonorRequest,
) -> AppResult<UserProfile> {
    let name = validate::required("Name", &req.name)?;
    let email = validate::email(&req.email)?;
    validate::password(&req.password)?;
    ensure_email_free(store, &email).await?;

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        name,
        email,
        password_hash: auth::hash_password(&req.password)?,
        role: Role::Donor,
        branch: None,
        address: validate::optional(req.address.as_deref()),
        phone_number: validate::optional(req.phone_number.as_deref()),
        is_active: true,
        created_at: Utc::now(),
    };
    store::insert(store, &user).await?;

    tracing::info!("Registered donor {} ({})", user.id, user.email);
    Ok(UserProfile::from(&user))
}

pub async fn login(
    store: &dyn Store,
    sessions: &SessionKeys,
    req: LoginRequest,
) -> AppResult<LoginResponse> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(AppError::validation("Email and password are required."));
    }

    let user = match find_by_email(store, &email).await? {
        Some(user) if auth::verify_password(&req.password, &user.password_hash) => user,
        _ => {
            tracing::warn!("Failed login attempt for {}", email);
            return Err(AppError::Authentication(BAD_CREDENTIALS.to_string()));
        }
    };
    if !user.is_active {
        return Err(AppError::forbidden("This account has been deactivated."));
    }

    let (token, expires_at) = sessions.issue(&user)?;
    tracing::info!("User {} logged in as {}", user.id, user.role.as_str());
    Ok(LoginResponse {
        token,
        expires_at,
        user: UserProfile::from(&user),
    })
}

pub fn me(caller: &Caller) -> UserProfile {
    UserProfile::from(caller.user())
}

pub async fn list(
    store: &dyn Store,
    caller: &Caller,
    role: Option<Role>,
) -> AppResult<Vec<UserProfile>> {
    caller.require_head_office()?;

    let filter = match role {
        Some(role) => Filter::all().eq("role", role.as_str()),
        None => Filter::all(),
    };
    let mut users = store::fetch_all::<User>(store, &filter).await?;
    users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(users.iter().map(UserProfile::from).collect())
}

pub async fn get(store: &dyn Store, caller: &Caller, id: &str) -> AppResult<UserProfile> {
    caller.require_head_office()?;
    let user = load(store, id).await?;
    Ok(UserProfile::from(&user))
}

/// Head-office edit of any account, including activation.
pub async fn update(
    store: &dyn Store,
    caller: &Caller,
    id: &str,
    req: UpdateUserRequest,
) -> AppResult<UserProfile> {
    caller.require_head_office()?;
    let mut user = load(store, id).await?;

    if let Some(is_active) = req.is_active {
        if !is_active && user.id == caller.user_id() {
            return Err(AppError::validation("You cannot deactivate your own account."));
        }
        user.is_active = is_active;
    }
    apply_profile_changes(&mut user, &req)?;

    save(store, &user).await?;
    tracing::info!("User {} updated by {}", user.id, caller.user_id());
    Ok(UserProfile::from(&user))
}

/// A caller editing their own contact details.
pub async fn update_me(
    store: &dyn Store,
    caller: &Caller,
    req: UpdateUserRequest,
) -> AppResult<UserProfile> {
    if req.is_active.is_some() {
        return Err(AppError::forbidden("Only head office can change account activation."));
    }
    let mut user = load(store, caller.user_id()).await?;
    apply_profile_changes(&mut user, &req)?;

    save(store, &user).await?;
    Ok(UserProfile::from(&user))
}

/// Removes an account. A branch admin's branch loses its admin reference
/// in the same transaction.
pub async fn delete(store: &dyn Store, caller: &Caller, id: &str) -> AppResult<UserProfile> {
    caller.require_head_office()?;
    if id == caller.user_id() {
        return Err(AppError::validation("You cannot delete your own account."));
    }
    let user = load(store, id).await?;

    let mut ops = vec![store::delete_op::<User>(&user.id)];
    if user.role == Role::BranchAdmin {
        let managed = Filter::all().eq("admin", user.id.as_str());
        let branches = store::fetch_all::<Branch>(store, &managed).await?;
        for mut branch in branches {
            branch.admin = None;
            ops.push(store::replace_op(&branch)?);
        }
    }
    store.transact(ops).await?;

    tracing::info!("User {} ({}) deleted by {}", user.id, user.role.as_str(), caller.user_id());
    Ok(UserProfile::from(&user))
}

async fn load(store: &dyn Store, id: &str) -> AppResult<User> {
    store::fetch::<User>(store, id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found."))
}

async fn save(store: &dyn Store, user: &User) -> AppResult<()> {
    if !store::replace(store, user).await? {
        return Err(AppError::not_found("User not found."));
    }
    Ok(())
}

fn apply_profile_changes(user: &mut User, req: &UpdateUserRequest) -> AppResult<()> {
    if let Some(name) = &req.name {
        user.name = validate::required("Name", name)?;
    }
    if let Some(address) = &req.address {
        user.address = validate::optional(Some(address));
    }
    if let Some(phone_number) = &req.phone_number {
        user.phone_number = validate::optional(Some(phone_number));
    }
    Ok(())
}
