use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ========== USER ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    HeadOfficeAdmin,
    BranchAdmin,
    Donor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::HeadOfficeAdmin => "HEAD_OFFICE_ADMIN",
            Role::BranchAdmin => "BRANCH_ADMIN",
            Role::Donor => "DONOR",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "HEAD_OFFICE_ADMIN" => Some(Role::HeadOfficeAdmin),
            "BRANCH_ADMIN" => Some(Role::BranchAdmin),
            "DONOR" => Some(Role::Donor),
            _ => None,
        }
    }
}

/// Stored user record. Never serialised to API callers directly, see [`UserProfile`].
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub branch: Option<String>,
    pub address: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            branch: user.branch.clone(),
            address: user.address.clone(),
            phone_number: user.phone_number.clone(),
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

/// Identity shown next to a donation or branch.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDonorRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub address: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: Option<bool>,
}

// ========== BRANCH ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub account_title: String,
    pub bank_name: String,
    pub account_number: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    pub name: String,
    pub location: String,
    pub phone_number: String,
    #[serde(default)]
    pub admin: Option<String>, // user id of the BRANCH_ADMIN
    pub payment_info: PaymentInfo,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BranchSummary {
    pub id: String,
    pub name: String,
    pub location: String,
}

impl From<&Branch> for BranchSummary {
    fn from(branch: &Branch) -> Self {
        Self {
            id: branch.id.clone(),
            name: branch.name.clone(),
            location: branch.location.clone(),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BranchView {
    #[serde(flatten)]
    pub branch: Branch,
    pub admin_details: Option<UserSummary>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BranchInput {
    pub name: String,
    pub location: String,
    pub phone_number: String,
    pub payment_info: PaymentInfo,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdminInput {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBranchRequest {
    pub branch: BranchInput,
    pub admin: Option<AdminInput>,
}

#[derive(Debug, Serialize)]
pub struct CreatedBranch {
    pub branch: Branch,
    pub admin: Option<UserProfile>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BranchPatch {
    pub name: Option<String>,
    pub location: Option<String>,
    pub phone_number: Option<String>,
    pub payment_info: Option<PaymentInfo>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AdminPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateBranchRequest {
    pub branch: Option<BranchPatch>,
    pub admin: Option<AdminPatch>,
}

/// Result of a branch deletion: the admin is removed with the branch,
/// everything else that references the branch stays in place.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchDeletion {
    pub branch: Branch,
    pub removed_admin: Option<String>,
    pub retained_students: u64,
    pub retained_donations: u64,
    pub retained_needs: u64,
}

// ========== STUDENT ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub branch: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub guardian_name: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub contact_number: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub enrollment_date: NaiveDate,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct StudentSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    #[serde(flatten)]
    pub student: Student,
    pub branch_details: Option<BranchSummary>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateStudentRequest {
    pub name: String,
    pub branch: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub guardian_name: Option<String>,
    pub gender: Option<Gender>,
    pub contact_number: Option<String>,
    pub address: Option<String>,
    pub enrollment_date: Option<NaiveDate>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStudentRequest {
    pub name: Option<String>,
    pub branch: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub guardian_name: Option<String>,
    pub gender: Option<Gender>,
    pub contact_number: Option<String>,
    pub address: Option<String>,
    pub enrollment_date: Option<NaiveDate>,
    pub is_active: Option<bool>,
}

// ========== DONATION ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DonationStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    General,
    SpecificStudent,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Donation {
    pub id: String,
    pub donor: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub student: Option<String>,
    pub amount: f64,
    pub receipt_image: String,
    pub status: DonationStatus,
    pub category: Category,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DonationView {
    #[serde(flatten)]
    pub donation: Donation,
    pub donor_details: Option<UserSummary>,
    pub branch_details: Option<BranchSummary>,
    pub student_details: Option<StudentSummary>,
}

/// Receipt bytes sent inline with a request, base64 encoded.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateDonationRequest {
    pub branch: Option<String>,
    pub student: Option<String>,
    pub amount: f64,
    pub receipt_image: Option<String>,
    pub receipt_file: Option<ReceiptFile>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDonationRequest {
    pub amount: Option<f64>,
    pub notes: Option<String>,
    pub receipt_image: Option<String>,
    pub receipt_file: Option<ReceiptFile>,
    /// `null` clears the student, an id retargets the donation.
    #[serde(default, deserialize_with = "double_option")]
    pub student: Option<Option<String>>,
    pub status: Option<DonationStatus>,
}

impl UpdateDonationRequest {
    pub fn is_empty(&self) -> bool {
        self.amount.is_none()
            && self.notes.is_none()
            && self.receipt_image.is_none()
            && self.receipt_file.is_none()
            && self.student.is_none()
            && self.status.is_none()
    }
}

// ========== NEED ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NeedStatus {
    Pending,
    Approved,
    Rejected,
    Fulfilled,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Need {
    pub id: String,
    pub title: String,
    pub description: String,
    pub quantity_or_amount: String,
    pub branch: String,
    pub status: NeedStatus,
    #[serde(default)]
    pub fulfilled_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateNeedRequest {
    pub title: String,
    pub description: String,
    pub quantity_or_amount: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNeedRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub quantity_or_amount: Option<String>,
    pub status: Option<NeedStatus>,
}

impl UpdateNeedRequest {
    pub fn has_content_changes(&self) -> bool {
        self.title.is_some() || self.description.is_some() || self.quantity_or_amount.is_some()
    }
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn donation_patch_distinguishes_null_from_missing_student() {
        let missing: UpdateDonationRequest = serde_json::from_str(r#"{"amount": 5}"#).unwrap();
        assert_eq!(missing.student, None);

        let cleared: UpdateDonationRequest = serde_json::from_str(r#"{"student": null}"#).unwrap();
        assert_eq!(cleared.student, Some(None));

        let set: UpdateDonationRequest = serde_json::from_str(r#"{"student": "s-1"}"#).unwrap();
        assert_eq!(set.student, Some(Some("s-1".to_string())));
    }

    #[test]
    fn enums_use_upper_snake_case_on_the_wire() {
        assert_eq!(serde_json::to_value(Role::HeadOfficeAdmin).unwrap(), "HEAD_OFFICE_ADMIN");
        assert_eq!(serde_json::to_value(Category::SpecificStudent).unwrap(), "SPECIFIC_STUDENT");
        assert_eq!(serde_json::to_value(NeedStatus::Fulfilled).unwrap(), "FULFILLED");
        assert_eq!(Role::parse("DONOR"), Some(Role::Donor));
        assert_eq!(Role::parse("donor"), None);
    }

    #[test]
    fn user_profile_never_carries_the_password_hash() {
        let user = User {
            id: "u-1".into(),
            name: "A".into(),
            email: "a@x.com".into(),
            password_hash: "$argon2id$secret".into(),
            role: Role::Donor,
            branch: None,
            address: None,
            phone_number: None,
            is_active: true,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&UserProfile::from(&user)).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("passwordHash"));
    }
}
