//! Role-specific dashboard summaries, recomputed from the store on every
//! request.

use serde::Serialize;

use crate::auth::Caller;
use crate::branches;
use crate::donations::resolve_donations;
use crate::error::{AppError, AppResult};
use crate::store::{self, Collection, Filter, Store};
use crate::students::resolve_students;
use crate::types::{Branch, Donation, DonationView, Student, StudentView};

const RECENT_LIMIT: usize = 5;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadOfficeDashboard {
    pub total_students: u64,
    /// Sum over every donation regardless of status.
    pub total_donations: f64,
    pub approved_donations: f64,
    pub total_branches: u64,
    pub total_users: u64,
    pub recent_donations: Vec<DonationView>,
    pub recent_students: Vec<StudentView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchDashboard {
    pub branch_details: Branch,
    pub total_students: u64,
    pub total_donations: f64,
    pub approved_donations: f64,
    pub recent_donations: Vec<DonationView>,
    pub recent_students: Vec<StudentView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorDashboard {
    pub total_donations: f64,
    pub approved_donations: f64,
    pub donation_count: u64,
    pub recent_donations: Vec<DonationView>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DashboardView {
    HeadOffice(HeadOfficeDashboard),
    Branch(BranchDashboard),
    Donor(DonorDashboard),
}

pub async fn for_caller(store: &dyn Store, caller: &Caller) -> AppResult<DashboardView> {
    match caller {
        Caller::HeadOffice(_) => head_office(store, caller).await.map(DashboardView::HeadOffice),
        Caller::BranchAdmin { .. } => branch_admin(store, caller).await.map(DashboardView::Branch),
        Caller::Donor(_) => donor(store, caller).await.map(DashboardView::Donor),
    }
}

pub async fn head_office(store: &dyn Store, caller: &Caller) -> AppResult<HeadOfficeDashboard> {
    caller.require_head_office()?;
    let everything = Filter::all();

    Ok(HeadOfficeDashboard {
        total_students: store.count(Collection::Students, &everything).await?,
        total_donations: store.aggregate_sum(Collection::Donations, &everything, "amount").await?,
        approved_donations: store
            .aggregate_sum(Collection::Donations, &approved(everything.clone()), "amount")
            .await?,
        total_branches: store.count(Collection::Branches, &everything).await?,
        total_users: store.count(Collection::Users, &everything).await?,
        recent_donations: recent_donations(store, &everything).await?,
        recent_students: recent_students(store, &everything).await?,
    })
}

pub async fn branch_admin(store: &dyn Store, caller: &Caller) -> AppResult<BranchDashboard> {
    let branch_id = match caller {
        Caller::BranchAdmin { branch, .. } => branch,
        _ => return Err(AppError::forbidden("Only branch admins can view the branch dashboard.")),
    };
    let branch = branches::load(store, branch_id).await?;
    let scoped = Filter::all().eq("branch", branch_id.as_str());

    Ok(BranchDashboard {
        total_students: store.count(Collection::Students, &scoped).await?,
        total_donations: store.aggregate_sum(Collection::Donations, &scoped, "amount").await?,
        approved_donations: store
            .aggregate_sum(Collection::Donations, &approved(scoped.clone()), "amount")
            .await?,
        recent_donations: recent_donations(store, &scoped).await?,
        recent_students: recent_students(store, &scoped).await?,
        branch_details: branch,
    })
}

pub async fn donor(store: &dyn Store, caller: &Caller) -> AppResult<DonorDashboard> {
    let donor = match caller {
        Caller::Donor(user) => user,
        _ => return Err(AppError::forbidden("Only donors can view the donor dashboard.")),
    };
    let own = Filter::all().eq("donor", donor.id.as_str());

    Ok(DonorDashboard {
        total_donations: store.aggregate_sum(Collection::Donations, &own, "amount").await?,
        approved_donations: store
            .aggregate_sum(Collection::Donations, &approved(own.clone()), "amount")
            .await?,
        donation_count: store.count(Collection::Donations, &own).await?,
        recent_donations: recent_donations(store, &own).await?,
    })
}

fn approved(filter: Filter) -> Filter {
    filter.eq("status", "APPROVED")
}

async fn recent_donations(store: &dyn Store, filter: &Filter) -> AppResult<Vec<DonationView>> {
    let mut donations = store::fetch_all::<Donation>(store, filter).await?;
    donations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    donations.truncate(RECENT_LIMIT);
    resolve_donations(store, donations).await
}

async fn recent_students(store: &dyn Store, filter: &Filter) -> AppResult<Vec<StudentView>> {
    let mut students = store::fetch_all::<Student>(store, filter).await?;
    students.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    students.truncate(RECENT_LIMIT);
    resolve_students(store, students).await
}
