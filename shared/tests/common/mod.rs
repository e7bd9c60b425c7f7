#![allow(dead_code)]

use agosh_shared::auth::{self, Caller};
use agosh_shared::branches;
use agosh_shared::store::memory::MemoryStore;
use agosh_shared::store::{self, Store};
use agosh_shared::students;
use agosh_shared::types::{
    AdminInput, BranchInput, CreateBranchRequest, CreateDonationRequest, CreateStudentRequest,
    PaymentInfo, Role, User,
};
use chrono::Utc;

pub const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

pub async fn user(store: &dyn Store, id: &str, role: Role, branch: Option<&str>) -> Caller {
    let user = User {
        id: id.to_string(),
        name: id.to_string(),
        email: format!("{}@agosh.test", id),
        password_hash: auth::hash_password("secret1").unwrap(),
        role,
        branch: branch.map(str::to_string),
        address: None,
        phone_number: None,
        is_active: true,
        created_at: Utc::now(),
    };
    store::insert(store, &user).await.unwrap();
    Caller::from_user(user).unwrap()
}

pub async fn head_office(store: &dyn Store) -> Caller {
    user(store, "hq", Role::HeadOfficeAdmin, None).await
}

pub async fn donor(store: &dyn Store, id: &str) -> Caller {
    user(store, id, Role::Donor, None).await
}

pub fn branch_request(name: &str, admin_email: Option<&str>) -> CreateBranchRequest {
    CreateBranchRequest {
        branch: BranchInput {
            name: name.to_string(),
            location: name.to_string(),
            phone_number: "0300-0000000".to_string(),
            payment_info: PaymentInfo {
                account_title: format!("Agosh {}", name),
                bank_name: "HBL".to_string(),
                account_number: "111".to_string(),
            },
        },
        admin: admin_email.map(|email| AdminInput {
            name: "A".to_string(),
            email: email.to_string(),
            password: "secret1".to_string(),
        }),
    }
}

/// Creates a branch with an admin and returns (branch id, admin caller).
pub async fn branch_with_admin(store: &MemoryStore, hq: &Caller, name: &str) -> (String, Caller) {
    let email = format!("{}@agosh.test", name.to_lowercase());
    let created = branches::create(store, hq, branch_request(name, Some(&email))).await.unwrap();
    let admin_id = created.admin.unwrap().id;
    let admin = store::fetch::<User>(store, &admin_id).await.unwrap().unwrap();
    (created.branch.id, Caller::from_user(admin).unwrap())
}

pub async fn student(store: &MemoryStore, hq: &Caller, branch: &str, name: &str) -> String {
    let req = CreateStudentRequest {
        name: name.to_string(),
        branch: Some(branch.to_string()),
        date_of_birth: None,
        guardian_name: None,
        gender: None,
        contact_number: None,
        address: None,
        enrollment_date: None,
        is_active: None,
    };
    students::create(store, hq, req).await.unwrap().student.id
}

pub fn donation(branch: Option<&str>, student: Option<&str>, amount: f64) -> CreateDonationRequest {
    CreateDonationRequest {
        branch: branch.map(str::to_string),
        student: student.map(str::to_string),
        amount,
        receipt_image: Some("https://receipts.agosh.test/r.png".to_string()),
        ..Default::default()
    }
}
