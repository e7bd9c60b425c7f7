//! Donation ledger.
//!
//! A donation targets a branch, optionally one student of that branch. Its
//! category is never taken from the caller: [`derive_category`] recomputes it
//! from the student reference whenever a donation is built or changed.

use std::collections::HashMap;

use chrono::Utc;

use crate::auth::Caller;
use crate::error::{AppError, AppResult};
use crate::files::{FileStore, ReceiptUpload};
use crate::store::{self, Collection, Filter, Store};
use crate::students::{self, BranchCache};
use crate::types::{
    Branch, Category, CreateDonationRequest, Donation, DonationStatus, DonationView, ReceiptFile,
    Student, StudentSummary, UpdateDonationRequest, User, UserSummary,
};
use crate::validate;

/// `SPECIFIC_STUDENT` exactly when the donation names a student.
pub fn derive_category(donation: &Donation) -> Category {
    match donation.student {
        Some(_) => Category::SpecificStudent,
        None => Category::General,
    }
}

/// Largest single donation accepted. Keeps every total finite and inside
/// DynamoDB's number range.
pub const MAX_DONATION_AMOUNT: f64 = 1.0e12;

pub fn validate_amount(amount: f64) -> AppResult<f64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(AppError::validation("Donation amount must be greater than zero."));
    }
    if amount > MAX_DONATION_AMOUNT {
        return Err(AppError::validation(format!(
            "Donation amount cannot exceed {}.",
            MAX_DONATION_AMOUNT
        )));
    }
    Ok(amount)
}

/// Receipt supplied with a request, checked but not yet uploaded.
enum Receipt {
    Hosted(String),
    Upload(ReceiptUpload),
}

impl Receipt {
    fn from_request(image: Option<&str>, file: Option<&ReceiptFile>) -> AppResult<Option<Receipt>> {
        if let Some(file) = file {
            return Ok(Some(Receipt::Upload(ReceiptUpload::from_file(file)?)));
        }
        Ok(validate::optional(image).map(Receipt::Hosted))
    }

    async fn into_url(self, files: &dyn FileStore) -> AppResult<String> {
        match self {
            Receipt::Hosted(url) => Ok(url),
            Receipt::Upload(upload) => files.store(&upload).await.map_err(|e| {
                tracing::error!("Receipt upload failed: {}", e);
                AppError::from(e)
            }),
        }
    }
}

/// Records a donation from the calling donor. Everything is validated
/// before the receipt is uploaded, and nothing is written if the upload
/// fails.
pub async fn create(
    store: &dyn Store,
    files: &dyn FileStore,
    caller: &Caller,
    req: CreateDonationRequest,
) -> AppResult<DonationView> {
    let donor = match caller {
        Caller::Donor(user) => user,
        _ => return Err(AppError::validation("Donations can only be made from a donor account.")),
    };
    let amount = validate_amount(req.amount)?;
    let receipt = Receipt::from_request(req.receipt_image.as_deref(), req.receipt_file.as_ref())?
        .ok_or_else(|| AppError::validation("Receipt image is required."))?;

    let student_id = validate::optional(req.student.as_deref());
    let branch_id = validate::optional(req.branch.as_deref());
    let branch = match (&student_id, &branch_id) {
        (None, None) => {
            return Err(AppError::validation("Select a branch or a student to donate to."))
        }
        (Some(student_id), branch_id) => {
            let student = referenced_student(store, student_id).await?;
            if let Some(branch_id) = branch_id {
                if *branch_id != student.branch {
                    return Err(AppError::validation(
                        "The selected student does not belong to the selected branch.",
                    ));
                }
            }
            student.branch
        }
        (None, Some(branch_id)) => referenced_branch(store, branch_id).await?.id,
    };

    let receipt_image = receipt.into_url(files).await?;

    let mut donation = Donation {
        id: uuid::Uuid::new_v4().to_string(),
        donor: donor.id.clone(),
        branch: Some(branch),
        student: student_id,
        amount,
        receipt_image,
        status: DonationStatus::Pending,
        category: Category::General,
        notes: validate::optional(req.notes.as_deref()),
        created_at: Utc::now(),
    };
    donation.category = derive_category(&donation);
    store::insert(store, &donation).await?;

    tracing::info!(
        "Donation {} of {} recorded for donor {} ({:?})",
        donation.id,
        donation.amount,
        donation.donor,
        donation.category
    );
    single_view(store, donation).await
}

/// Overwrites the status. Any status may follow any other.
pub async fn update_status(
    store: &dyn Store,
    caller: &Caller,
    id: &str,
    status: DonationStatus,
) -> AppResult<DonationView> {
    caller.require_admin()?;
    let mut donation = load_managed(store, caller, id).await?;

    donation.status = status;
    save(store, &donation).await?;

    tracing::info!("Donation {} set to {:?} by {}", donation.id, status, caller.user_id());
    single_view(store, donation).await
}

/// Patches amount, notes, receipt and student, re-deriving the category.
pub async fn update_fields(
    store: &dyn Store,
    files: &dyn FileStore,
    caller: &Caller,
    id: &str,
    patch: UpdateDonationRequest,
) -> AppResult<DonationView> {
    let patch = UpdateDonationRequest { status: None, ..patch };
    update(store, files, caller, id, patch).await
}

/// Applies field changes and, if present, a status change in one write.
pub async fn update(
    store: &dyn Store,
    files: &dyn FileStore,
    caller: &Caller,
    id: &str,
    req: UpdateDonationRequest,
) -> AppResult<DonationView> {
    caller.require_admin()?;
    if req.is_empty() {
        return Err(AppError::validation("Nothing to update."));
    }
    let mut donation = load_managed(store, caller, id).await?;

    if let Some(amount) = req.amount {
        donation.amount = validate_amount(amount)?;
    }
    if let Some(notes) = &req.notes {
        donation.notes = validate::optional(Some(notes));
    }
    if let Some(student) = &req.student {
        match validate::optional(student.as_deref()) {
            Some(student_id) => {
                let student = referenced_student(store, &student_id).await?;
                if donation.branch.is_none() {
                    donation.branch = Some(student.branch.clone());
                }
                if donation.branch.as_deref() != Some(student.branch.as_str()) {
                    return Err(AppError::validation(
                        "The selected student does not belong to this donation's branch.",
                    ));
                }
                donation.student = Some(student_id);
            }
            None => donation.student = None,
        }
    }
    let receipt = Receipt::from_request(req.receipt_image.as_deref(), req.receipt_file.as_ref())?;
    if let Some(status) = req.status {
        donation.status = status;
    }
    donation.category = derive_category(&donation);

    if let Some(receipt) = receipt {
        donation.receipt_image = receipt.into_url(files).await?;
    }
    save(store, &donation).await?;

    tracing::info!("Donation {} updated by {}", donation.id, caller.user_id());
    single_view(store, donation).await
}

pub async fn delete(store: &dyn Store, caller: &Caller, id: &str) -> AppResult<Donation> {
    caller.require_head_office()?;
    let removed = store
        .delete_by_id(Collection::Donations, id)
        .await?
        .ok_or_else(|| AppError::not_found("Donation not found."))?;
    let donation: Donation = store::from_document(removed)?;

    tracing::info!("Donation {} deleted by {}", donation.id, caller.user_id());
    Ok(donation)
}

pub async fn list_all(store: &dyn Store, caller: &Caller) -> AppResult<Vec<DonationView>> {
    caller.require_head_office()?;
    let donations = store::fetch_all::<Donation>(store, &Filter::all()).await?;
    resolve_donations(store, donations).await
}

pub async fn get_by_id(store: &dyn Store, caller: &Caller, id: &str) -> AppResult<DonationView> {
    let donation = load(store, id).await?;
    let visible = match caller {
        Caller::HeadOffice(_) => true,
        Caller::BranchAdmin { branch, .. } => donation.branch.as_deref() == Some(branch.as_str()),
        Caller::Donor(user) => donation.donor == user.id,
    };
    if !visible {
        return Err(AppError::forbidden("You do not have access to this donation."));
    }
    single_view(store, donation).await
}

pub async fn list_by_donor(
    store: &dyn Store,
    caller: &Caller,
    donor_id: &str,
) -> AppResult<Vec<DonationView>> {
    let filter = Filter::all().eq("donor", donor_id);
    let filter = match caller {
        Caller::HeadOffice(_) => filter,
        Caller::BranchAdmin { branch, .. } => filter.eq("branch", branch.as_str()),
        Caller::Donor(user) if user.id == donor_id => filter,
        Caller::Donor(_) => {
            return Err(AppError::forbidden("You can only view your own donations."))
        }
    };
    let donations = store::fetch_all::<Donation>(store, &filter).await?;
    resolve_donations(store, donations).await
}

pub async fn list_by_branch(
    store: &dyn Store,
    caller: &Caller,
    branch_id: &str,
) -> AppResult<Vec<DonationView>> {
    caller.require_admin()?;
    if !caller.manages_branch(branch_id) {
        return Err(AppError::forbidden("You can only view donations of your own branch."));
    }
    let filter = Filter::all().eq("branch", branch_id);
    let donations = store::fetch_all::<Donation>(store, &filter).await?;
    resolve_donations(store, donations).await
}

/// Sorts newest-first and joins donor, branch and student identities.
pub(crate) async fn resolve_donations(
    store: &dyn Store,
    mut donations: Vec<Donation>,
) -> AppResult<Vec<DonationView>> {
    donations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut resolver = Resolver::default();
    let mut views = Vec::with_capacity(donations.len());
    for donation in donations {
        views.push(resolver.view(store, donation).await?);
    }
    Ok(views)
}

async fn single_view(store: &dyn Store, donation: Donation) -> AppResult<DonationView> {
    Resolver::default().view(store, donation).await
}

#[derive(Default)]
struct Resolver {
    donors: HashMap<String, Option<UserSummary>>,
    students: HashMap<String, Option<StudentSummary>>,
    branches: BranchCache,
}

impl Resolver {
    async fn view(&mut self, store: &dyn Store, donation: Donation) -> AppResult<DonationView> {
        let donor_details = match self.donors.get(&donation.donor) {
            Some(cached) => cached.clone(),
            None => {
                let summary = store::fetch::<User>(store, &donation.donor)
                    .await?
                    .as_ref()
                    .map(UserSummary::from);
                self.donors.insert(donation.donor.clone(), summary.clone());
                summary
            }
        };
        let branch_details = match &donation.branch {
            Some(branch) => self.branches.summary(store, branch).await?,
            None => None,
        };
        let student_details = match &donation.student {
            Some(student) => match self.students.get(student) {
                Some(cached) => cached.clone(),
                None => {
                    let summary = store::fetch::<Student>(store, student)
                        .await?
                        .map(|s| StudentSummary {
                            id: s.id,
                            name: s.name,
                        });
                    self.students.insert(student.clone(), summary.clone());
                    summary
                }
            },
            None => None,
        };

        Ok(DonationView {
            donation,
            donor_details,
            branch_details,
            student_details,
        })
    }
}

async fn load(store: &dyn Store, id: &str) -> AppResult<Donation> {
    store::fetch::<Donation>(store, id)
        .await?
        .ok_or_else(|| AppError::not_found("Donation not found."))
}

/// Loads a donation the calling admin is allowed to change.
async fn load_managed(store: &dyn Store, caller: &Caller, id: &str) -> AppResult<Donation> {
    let donation = load(store, id).await?;
    let managed = match &donation.branch {
        Some(branch) => caller.manages_branch(branch),
        None => matches!(caller, Caller::HeadOffice(_)),
    };
    if !managed {
        return Err(AppError::forbidden("You can only manage donations of your own branch."));
    }
    Ok(donation)
}

async fn save(store: &dyn Store, donation: &Donation) -> AppResult<()> {
    if !store::replace(store, donation).await? {
        return Err(AppError::not_found("Donation not found."));
    }
    Ok(())
}

async fn referenced_student(store: &dyn Store, id: &str) -> AppResult<Student> {
    match students::load(store, id).await {
        Err(AppError::NotFound(_)) => Err(AppError::validation("Selected student does not exist.")),
        other => other,
    }
}

async fn referenced_branch(store: &dyn Store, id: &str) -> AppResult<Branch> {
    store::fetch::<Branch>(store, id)
        .await?
        .ok_or_else(|| AppError::validation("Selected branch does not exist."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;
    use rstest::rstest;

    fn donation(student: Option<&str>) -> Donation {
        Donation {
            id: "d-1".into(),
            donor: "u-1".into(),
            branch: Some("b-1".into()),
            student: student.map(str::to_string),
            amount: 10.0,
            receipt_image: "url".into(),
            status: DonationStatus::Pending,
            category: Category::General,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn category_follows_student_reference() {
        assert_eq!(derive_category(&donation(None)), Category::General);
        assert_eq!(derive_category(&donation(Some("s-1"))), Category::SpecificStudent);
    }

    #[rstest]
    #[case(0.0)]
    #[case(-1.0)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    #[case(MAX_DONATION_AMOUNT * 2.0)]
    #[case(1.0e308)]
    fn out_of_range_amounts_are_rejected(#[case] amount: f64) {
        assert_eq!(validate_amount(amount).unwrap_err().kind(), ErrorKind::Validation);
    }

    proptest! {
        #[test]
        fn any_positive_finite_amount_is_accepted(amount in 0.01f64..=MAX_DONATION_AMOUNT) {
            prop_assert_eq!(validate_amount(amount).unwrap(), amount);
        }

        #[test]
        fn category_is_specific_iff_student_is_set(
            student in proptest::option::of("[a-z0-9-]{1,12}"),
        ) {
            let d = donation(student.as_deref());
            let expected = if student.is_some() {
                Category::SpecificStudent
            } else {
                Category::General
            };
            prop_assert_eq!(derive_category(&d), expected);
        }
    }
}
