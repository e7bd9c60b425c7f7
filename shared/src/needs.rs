//! Need reports: branch requests to head office, editable by the owning
//! branch only while PENDING.

use chrono::Utc;

use crate::auth::Caller;
use crate::error::{AppError, AppResult};
use crate::store::{self, Collection, Filter, Store};
use crate::types::{CreateNeedRequest, Need, NeedStatus, UpdateNeedRequest};
use crate::validate;

const MAX_TITLE: usize = 100;
const MAX_DESCRIPTION: usize = 500;
const MAX_QUANTITY: usize = 50;

pub async fn create(store: &dyn Store, caller: &Caller, req: CreateNeedRequest) -> AppResult<Need> {
    let branch = match caller {
        Caller::BranchAdmin { branch, .. } => branch.clone(),
        _ => return Err(AppError::forbidden("Only branch admins can submit needs.")),
    };

    let need = Need {
        id: uuid::Uuid::new_v4().to_string(),
        title: validate::required_max("Title", &req.title, MAX_TITLE)?,
        description: validate::required_max("Description", &req.description, MAX_DESCRIPTION)?,
        quantity_or_amount: validate::required_max(
            "Quantity or amount",
            &req.quantity_or_amount,
            MAX_QUANTITY,
        )?,
        branch,
        status: NeedStatus::Pending,
        fulfilled_date: None,
        created_at: Utc::now(),
    };
    store::insert(store, &need).await?;

    tracing::info!("Need {} submitted by branch {}", need.id, need.branch);
    Ok(need)
}

/// Edits a need's content. The owning branch may edit while PENDING; head
/// office may only change the status, which goes through [`set_status`].
pub async fn update(
    store: &dyn Store,
    caller: &Caller,
    id: &str,
    req: UpdateNeedRequest,
) -> AppResult<Need> {
    caller.require_admin()?;

    if let Caller::HeadOffice(_) = caller {
        if req.has_content_changes() {
            return Err(AppError::forbidden("Head office can only change the status of a need."));
        }
        let status = req
            .status
            .ok_or_else(|| AppError::validation("Nothing to update."))?;
        return set_status(store, caller, id, status).await;
    }

    if req.status.is_some_and(|status| status != NeedStatus::Pending) {
        return Err(AppError::forbidden("Only head office can change the status of a need."));
    }
    if !req.has_content_changes() {
        return Err(AppError::validation("Nothing to update."));
    }

    let mut need = load_editable(store, caller, id).await?;
    if let Some(title) = &req.title {
        need.title = validate::required_max("Title", title, MAX_TITLE)?;
    }
    if let Some(description) = &req.description {
        need.description = validate::required_max("Description", description, MAX_DESCRIPTION)?;
    }
    if let Some(quantity_or_amount) = &req.quantity_or_amount {
        need.quantity_or_amount =
            validate::required_max("Quantity or amount", quantity_or_amount, MAX_QUANTITY)?;
    }
    save(store, &need).await?;

    tracing::info!("Need {} edited by branch {}", need.id, need.branch);
    Ok(need)
}

pub async fn delete(store: &dyn Store, caller: &Caller, id: &str) -> AppResult<Need> {
    caller.require_admin()?;
    let need = load_editable(store, caller, id).await?;

    store
        .delete_by_id(Collection::Needs, &need.id)
        .await?
        .ok_or_else(|| AppError::not_found("Need not found."))?;
    tracing::info!("Need {} withdrawn by branch {}", need.id, need.branch);
    Ok(need)
}

/// Head-office decision. FULFILLED stamps the fulfilment time; any other
/// status clears it.
pub async fn set_status(
    store: &dyn Store,
    caller: &Caller,
    id: &str,
    status: NeedStatus,
) -> AppResult<Need> {
    caller.require_head_office()?;
    if status == NeedStatus::Pending {
        return Err(AppError::validation("A need can only be approved, rejected or fulfilled."));
    }
    let mut need = load(store, id).await?;

    need.status = status;
    need.fulfilled_date = match status {
        NeedStatus::Fulfilled => Some(Utc::now()),
        _ => None,
    };
    save(store, &need).await?;

    tracing::info!("Need {} set to {:?} by {}", need.id, status, caller.user_id());
    Ok(need)
}

/// Head office sees every need, a branch admin their branch's, a donor the
/// approved ones.
pub async fn list_all(store: &dyn Store, caller: &Caller) -> AppResult<Vec<Need>> {
    let filter = match caller {
        Caller::HeadOffice(_) => Filter::all(),
        Caller::BranchAdmin { branch, .. } => Filter::all().eq("branch", branch.as_str()),
        Caller::Donor(_) => approved(),
    };
    fetch_sorted(store, filter).await
}

pub async fn list_by_branch(
    store: &dyn Store,
    caller: &Caller,
    branch_id: &str,
) -> AppResult<Vec<Need>> {
    let filter = match caller {
        Caller::HeadOffice(_) => Filter::all(),
        Caller::BranchAdmin { branch, .. } if branch == branch_id => Filter::all(),
        Caller::BranchAdmin { .. } => {
            return Err(AppError::forbidden("You can only view needs of your own branch."))
        }
        Caller::Donor(_) => approved(),
    };
    fetch_sorted(store, filter.eq("branch", branch_id)).await
}

pub async fn get_by_id(store: &dyn Store, caller: &Caller, id: &str) -> AppResult<Need> {
    let need = load(store, id).await?;
    let visible = match caller {
        Caller::Donor(_) => need.status == NeedStatus::Approved,
        _ => caller.manages_branch(&need.branch),
    };
    if !visible {
        return Err(AppError::forbidden("You do not have access to this need."));
    }
    Ok(need)
}

fn approved() -> Filter {
    Filter::all().eq("status", "APPROVED")
}

async fn fetch_sorted(store: &dyn Store, filter: Filter) -> AppResult<Vec<Need>> {
    let mut needs = store::fetch_all::<Need>(store, &filter).await?;
    needs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(needs)
}

async fn load(store: &dyn Store, id: &str) -> AppResult<Need> {
    store::fetch::<Need>(store, id)
        .await?
        .ok_or_else(|| AppError::not_found("Need not found."))
}

/// Only the submitting branch may touch a need, and only while PENDING.
async fn load_editable(store: &dyn Store, caller: &Caller, id: &str) -> AppResult<Need> {
    let need = load(store, id).await?;
    if caller.branch() != Some(need.branch.as_str()) {
        return Err(AppError::forbidden("You can only manage needs of your own branch."));
    }
    if need.status != NeedStatus::Pending {
        return Err(AppError::forbidden(
            "This need has already been reviewed and can no longer be changed.",
        ));
    }
    Ok(need)
}

async fn save(store: &dyn Store, need: &Need) -> AppResult<()> {
    if !store::replace(store, need).await? {
        return Err(AppError::not_found("Need not found."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::memory::MemoryStore;
    use crate::types::{Role, User};

    fn caller(role: Role, branch: Option<&str>) -> Caller {
        Caller::from_user(User {
            id: format!("{}-user", role.as_str()),
            name: "U".into(),
            email: "u@x.com".into(),
            password_hash: String::new(),
            role,
            branch: branch.map(str::to_string),
            address: None,
            phone_number: None,
            is_active: true,
            created_at: Utc::now(),
        })
        .unwrap()
    }

    fn books() -> CreateNeedRequest {
        CreateNeedRequest {
            title: "Books".into(),
            description: "Grade 5 textbooks".into(),
            quantity_or_amount: "100".into(),
        }
    }

    #[tokio::test]
    async fn only_branch_admins_submit_needs() {
        let store = MemoryStore::new();
        let err = create(&store, &caller(Role::HeadOfficeAdmin, None), books()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        let err = create(&store, &caller(Role::Donor, None), books()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn field_limits_are_enforced() {
        let store = MemoryStore::new();
        let admin = caller(Role::BranchAdmin, Some("b-1"));
        let mut req = books();
        req.title = "x".repeat(101);
        assert_eq!(create(&store, &admin, req).await.unwrap_err().kind(), ErrorKind::Validation);

        let mut req = books();
        req.quantity_or_amount = "9".repeat(51);
        assert_eq!(create(&store, &admin, req).await.unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(store.len(Collection::Needs), 0);
    }

    #[tokio::test]
    async fn fulfilment_is_stamped_and_cleared() {
        let store = MemoryStore::new();
        let hq = caller(Role::HeadOfficeAdmin, None);
        let need = create(&store, &caller(Role::BranchAdmin, Some("b-1")), books()).await.unwrap();

        let fulfilled = set_status(&store, &hq, &need.id, NeedStatus::Fulfilled).await.unwrap();
        assert!(fulfilled.fulfilled_date.is_some());

        let rejected = set_status(&store, &hq, &need.id, NeedStatus::Rejected).await.unwrap();
        assert!(rejected.fulfilled_date.is_none());

        let err = set_status(&store, &hq, &need.id, NeedStatus::Pending).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn other_branches_cannot_edit_or_withdraw() {
        let store = MemoryStore::new();
        let need = create(&store, &caller(Role::BranchAdmin, Some("b-1")), books()).await.unwrap();
        let other = caller(Role::BranchAdmin, Some("b-2"));

        let req = UpdateNeedRequest {
            title: Some("Pens".into()),
            ..Default::default()
        };
        let err = update(&store, &other, &need.id, req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        let err = delete(&store, &other, &need.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn head_office_content_edits_are_refused() {
        let store = MemoryStore::new();
        let need = create(&store, &caller(Role::BranchAdmin, Some("b-1")), books()).await.unwrap();
        let req = UpdateNeedRequest {
            title: Some("Pens".into()),
            status: Some(NeedStatus::Approved),
            ..Default::default()
        };
        let hq = caller(Role::HeadOfficeAdmin, None);
        let err = update(&store, &hq, &need.id, req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn donors_see_only_approved_needs() {
        let store = MemoryStore::new();
        let admin = caller(Role::BranchAdmin, Some("b-1"));
        let hq = caller(Role::HeadOfficeAdmin, None);
        let pending = create(&store, &admin, books()).await.unwrap();
        let approved = create(&store, &admin, books()).await.unwrap();
        set_status(&store, &hq, &approved.id, NeedStatus::Approved).await.unwrap();

        let donor = caller(Role::Donor, None);
        let visible: Vec<String> =
            list_all(&store, &donor).await.unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(visible, vec![approved.id]);
        assert!(get_by_id(&store, &donor, &pending.id).await.is_err());
    }
}
