//! Branch directory. A branch may own one BRANCH_ADMIN account; the two
//! are always written together.

use chrono::Utc;

use crate::auth::{self, Caller};
use crate::error::{AppError, AppResult};
use crate::store::{self, Collection, Filter, Store};
use crate::types::{
    AdminInput, Branch, BranchDeletion, BranchInput, BranchView, CreateBranchRequest, CreatedBranch,
    PaymentInfo, Role, UpdateBranchRequest, User, UserProfile, UserSummary,
};
use crate::users;
use crate::validate;

pub async fn create(
    store: &dyn Store,
    caller: &Caller,
    req: CreateBranchRequest,
) -> AppResult<CreatedBranch> {
    caller.require_head_office()?;

    let input = validate_branch(&req.branch)?;
    ensure_name_free(store, &input.name, None).await?;

    let mut branch = Branch {
        id: uuid::Uuid::new_v4().to_string(),
        name: input.name,
        location: input.location,
        phone_number: input.phone_number,
        admin: None,
        payment_info: input.payment_info,
        created_at: Utc::now(),
    };

    let admin = match &req.admin {
        Some(admin) => Some(new_admin(store, admin, &branch.id).await?),
        None => None,
    };

    match &admin {
        Some(admin) => {
            branch.admin = Some(admin.id.clone());
            store
                .transact(vec![store::put_op(&branch)?, store::put_op(admin)?])
                .await?;
            tracing::info!("Created branch {} with admin {}", branch.id, admin.id);
        }
        None => {
            store::insert(store, &branch).await?;
            tracing::info!("Created branch {} without an admin", branch.id);
        }
    }

    Ok(CreatedBranch {
        branch,
        admin: admin.as_ref().map(UserProfile::from),
    })
}

pub async fn update(
    store: &dyn Store,
    caller: &Caller,
    id: &str,
    req: UpdateBranchRequest,
) -> AppResult<BranchView> {
    caller.require_head_office()?;
    let mut branch = load(store, id).await?;

    if let Some(patch) = &req.branch {
        if let Some(name) = &patch.name {
            let name = validate::required("Branch name", name)?;
            if name != branch.name {
                ensure_name_free(store, &name, Some(&branch.id)).await?;
            }
            branch.name = name;
        }
        if let Some(location) = &patch.location {
            branch.location = validate::required("Location", location)?;
        }
        if let Some(phone_number) = &patch.phone_number {
            branch.phone_number = validate::required("Phone number", phone_number)?;
        }
        if let Some(payment_info) = &patch.payment_info {
            branch.payment_info = validate_payment_info(payment_info)?;
        }
    }

    let mut ops = vec![store::replace_op(&branch)?];
    let mut admin = None;
    if let Some(patch) = &req.admin {
        let admin_id = branch
            .admin
            .as_deref()
            .ok_or_else(|| AppError::validation("This branch has no admin to update."))?;
        let mut user = store::fetch::<User>(store, admin_id)
            .await?
            .ok_or_else(|| AppError::not_found("Branch admin not found."))?;

        if let Some(name) = &patch.name {
            user.name = validate::required("Admin name", name)?;
        }
        if let Some(email) = &patch.email {
            let email = validate::email(email)?;
            if email != user.email {
                users::ensure_email_free(store, &email).await?;
            }
            user.email = email;
        }
        if let Some(password) = &patch.password {
            validate::password(password)?;
            user.password_hash = auth::hash_password(password)?;
        }
        ops.push(store::replace_op(&user)?);
        admin = Some(user);
    }

    store.transact(ops).await?;
    tracing::info!("Updated branch {}", branch.id);

    let admin_details = match admin {
        Some(user) => Some(UserSummary::from(&user)),
        None => admin_summary(store, &branch).await?,
    };
    Ok(BranchView { branch, admin_details })
}

/// Removes the branch and its admin account together. Students, donations
/// and needs keep their branch reference and are reported as retained.
pub async fn delete(store: &dyn Store, caller: &Caller, id: &str) -> AppResult<BranchDeletion> {
    caller.require_head_office()?;
    let branch = load(store, id).await?;

    let references = Filter::all().eq("branch", branch.id.as_str());
    let retained_students = store.count(Collection::Students, &references).await?;
    let retained_donations = store.count(Collection::Donations, &references).await?;
    let retained_needs = store.count(Collection::Needs, &references).await?;

    let mut ops = vec![store::delete_op::<Branch>(&branch.id)];
    if let Some(admin_id) = &branch.admin {
        ops.push(store::delete_op::<User>(admin_id));
    }
    store.transact(ops).await?;

    tracing::info!(
        "Deleted branch {} (admin: {:?}); retained {} students, {} donations, {} needs",
        branch.id,
        branch.admin,
        retained_students,
        retained_donations,
        retained_needs
    );

    Ok(BranchDeletion {
        removed_admin: branch.admin.clone(),
        branch,
        retained_students,
        retained_donations,
        retained_needs,
    })
}

pub async fn list_all(store: &dyn Store) -> AppResult<Vec<BranchView>> {
    let mut branches = store::fetch_all::<Branch>(store, &Filter::all()).await?;
    branches.sort_by(|a, b| a.name.cmp(&b.name));

    let mut views = Vec::with_capacity(branches.len());
    for branch in branches {
        let admin_details = admin_summary(store, &branch).await?;
        views.push(BranchView { branch, admin_details });
    }
    Ok(views)
}

pub async fn get_by_id(store: &dyn Store, id: &str) -> AppResult<BranchView> {
    let branch = load(store, id).await?;
    let admin_details = admin_summary(store, &branch).await?;
    Ok(BranchView { branch, admin_details })
}

pub(crate) async fn load(store: &dyn Store, id: &str) -> AppResult<Branch> {
    store::fetch::<Branch>(store, id)
        .await?
        .ok_or_else(|| AppError::not_found("Branch not found."))
}

async fn admin_summary(store: &dyn Store, branch: &Branch) -> AppResult<Option<UserSummary>> {
    match &branch.admin {
        Some(admin_id) => Ok(store::fetch::<User>(store, admin_id)
            .await?
            .as_ref()
            .map(UserSummary::from)),
        None => Ok(None),
    }
}

async fn ensure_name_free(store: &dyn Store, name: &str, except: Option<&str>) -> AppResult<()> {
    let taken = store::fetch_all::<Branch>(store, &Filter::all().eq("name", name))
        .await?
        .iter()
        .any(|existing| Some(existing.id.as_str()) != except);
    if taken {
        return Err(AppError::validation("A branch with this name already exists."));
    }
    Ok(())
}

async fn new_admin(store: &dyn Store, input: &AdminInput, branch_id: &str) -> AppResult<User> {
    let name = validate::required("Admin name", &input.name)?;
    let email = validate::email(&input.email)?;
    validate::password(&input.password)?;
    users::ensure_email_free(store, &email).await?;

    Ok(User {
        id: uuid::Uuid::new_v4().to_string(),
        name,
        email,
        password_hash: auth::hash_password(&input.password)?,
        role: Role::BranchAdmin,
        branch: Some(branch_id.to_string()),
        address: None,
        phone_number: None,
        is_active: true,
        created_at: Utc::now(),
    })
}

fn validate_branch(input: &BranchInput) -> AppResult<BranchInput> {
    Ok(BranchInput {
        name: validate::required("Branch name", &input.name)?,
        location: validate::required("Location", &input.location)?,
        phone_number: validate::required("Phone number", &input.phone_number)?,
        payment_info: validate_payment_info(&input.payment_info)?,
    })
}

fn validate_payment_info(info: &PaymentInfo) -> AppResult<PaymentInfo> {
    Ok(PaymentInfo {
        account_title: validate::required("Account title", &info.account_title)?,
        bank_name: validate::required("Bank name", &info.bank_name)?,
        account_number: validate::required("Account number", &info.account_number)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::memory::MemoryStore;

    fn head_office() -> Caller {
        Caller::HeadOffice(User {
            id: "hq-1".into(),
            name: "HQ".into(),
            email: "hq@agosh.org".into(),
            password_hash: String::new(),
            role: Role::HeadOfficeAdmin,
            branch: None,
            address: None,
            phone_number: None,
            is_active: true,
            created_at: Utc::now(),
        })
    }

    fn request(name: &str) -> CreateBranchRequest {
        CreateBranchRequest {
            branch: BranchInput {
                name: name.into(),
                location: "Karachi".into(),
                phone_number: "021-000".into(),
                payment_info: PaymentInfo {
                    account_title: "Agosh Karachi".into(),
                    bank_name: "MCB".into(),
                    account_number: "222".into(),
                },
            },
            admin: None,
        }
    }

    #[tokio::test]
    async fn branch_names_are_unique() {
        let store = MemoryStore::new();
        create(&store, &head_office(), request("Karachi")).await.unwrap();
        let err = create(&store, &head_office(), request(" Karachi ")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn missing_payment_details_are_rejected() {
        let store = MemoryStore::new();
        let mut req = request("Quetta");
        req.branch.payment_info.account_number = " ".into();
        let err = create(&store, &head_office(), req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(store.len(Collection::Branches), 0);
    }

    #[tokio::test]
    async fn admin_patch_needs_an_admin() {
        let store = MemoryStore::new();
        let created = create(&store, &head_office(), request("Multan")).await.unwrap();
        let req = UpdateBranchRequest {
            branch: None,
            admin: Some(crate::types::AdminPatch {
                name: Some("New".into()),
                ..Default::default()
            }),
        };
        let err = update(&store, &head_office(), &created.branch.id, req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
