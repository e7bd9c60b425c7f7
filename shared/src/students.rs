use std::collections::HashMap;

use chrono::Utc;

use crate::auth::Caller;
use crate::error::{AppError, AppResult};
use crate::store::{self, Collection, Filter, Store};
use crate::types::{
    Branch, BranchSummary, CreateStudentRequest, Student, StudentView, UpdateStudentRequest,
};
use crate::validate;

pub async fn create(
    store: &dyn Store,
    caller: &Caller,
    req: CreateStudentRequest,
) -> AppResult<StudentView> {
    caller.require_admin()?;

    let branch_id = match caller {
        Caller::BranchAdmin { branch, .. } => branch.clone(),
        _ => req
            .branch
            .as_deref()
            .and_then(|b| validate::optional(Some(b)))
            .ok_or_else(|| AppError::validation("Branch is required."))?,
    };
    let branch = existing_branch(store, &branch_id).await?;

    let student = Student {
        id: uuid::Uuid::new_v4().to_string(),
        name: validate::required("Student name", &req.name)?,
        branch: branch.id.clone(),
        date_of_birth: req.date_of_birth,
        guardian_name: validate::optional(req.guardian_name.as_deref()),
        gender: req.gender,
        contact_number: validate::optional(req.contact_number.as_deref()),
        address: validate::optional(req.address.as_deref()),
        enrollment_date: req.enrollment_date.unwrap_or_else(|| Utc::now().date_naive()),
        is_active: req.is_active.unwrap_or(true),
        created_at: Utc::now(),
    };
    store::insert(store, &student).await?;

    tracing::info!("Enrolled student {} in branch {}", student.id, student.branch);
    Ok(StudentView {
        student,
        branch_details: Some(BranchSummary::from(&branch)),
    })
}

pub async fn update(
    store: &dyn Store,
    caller: &Caller,
    id: &str,
    req: UpdateStudentRequest,
) -> AppResult<StudentView> {
    caller.require_admin()?;
    let mut student = load(store, id).await?;
    if !caller.manages_branch(&student.branch) {
        return Err(AppError::forbidden("You can only manage students of your own branch."));
    }

    if let Some(branch_id) = req.branch.as_deref().map(str::trim) {
        if branch_id != student.branch {
            if !matches!(caller, Caller::HeadOffice(_)) {
                return Err(AppError::forbidden(
                    "Only head office can move a student to another branch.",
                ));
            }
            student.branch = existing_branch(store, branch_id).await?.id;
        }
    }
    if let Some(name) = &req.name {
        student.name = validate::required("Student name", name)?;
    }
    if req.date_of_birth.is_some() {
        student.date_of_birth = req.date_of_birth;
    }
    if let Some(guardian_name) = &req.guardian_name {
        student.guardian_name = validate::optional(Some(guardian_name));
    }
    if req.gender.is_some() {
        student.gender = req.gender;
    }
    if let Some(contact_number) = &req.contact_number {
        student.contact_number = validate::optional(Some(contact_number));
    }
    if let Some(address) = &req.address {
        student.address = validate::optional(Some(address));
    }
    if let Some(enrollment_date) = req.enrollment_date {
        student.enrollment_date = enrollment_date;
    }
    if let Some(is_active) = req.is_active {
        student.is_active = is_active;
    }

    if !store::replace(store, &student).await? {
        return Err(AppError::not_found("Student not found."));
    }
    tracing::info!("Updated student {}", student.id);

    let mut branches = BranchCache::default();
    branches.view(store, student).await
}

pub async fn delete(store: &dyn Store, caller: &Caller, id: &str) -> AppResult<Student> {
    caller.require_admin()?;
    let student = load(store, id).await?;
    if !caller.manages_branch(&student.branch) {
        return Err(AppError::forbidden("You can only manage students of your own branch."));
    }

    store
        .delete_by_id(Collection::Students, &student.id)
        .await?
        .ok_or_else(|| AppError::not_found("Student not found."))?;
    tracing::info!("Deleted student {} from branch {}", student.id, student.branch);
    Ok(student)
}

/// Head office sees every student (optionally one branch), a branch admin
/// their own branch, a donor the active students they can sponsor.
pub async fn list_all(
    store: &dyn Store,
    caller: &Caller,
    branch: Option<&str>,
) -> AppResult<Vec<StudentView>> {
    let filter = match caller {
        Caller::HeadOffice(_) => match branch {
            Some(branch) => Filter::all().eq("branch", branch),
            None => Filter::all(),
        },
        Caller::BranchAdmin { branch, .. } => Filter::all().eq("branch", branch.as_str()),
        Caller::Donor(_) => Filter::all().eq("isActive", true),
    };
    views(store, filter).await
}

pub async fn list_by_branch(
    store: &dyn Store,
    caller: &Caller,
    branch_id: &str,
) -> AppResult<Vec<StudentView>> {
    let filter = Filter::all().eq("branch", branch_id);
    let filter = match caller {
        Caller::HeadOffice(_) => filter,
        Caller::BranchAdmin { branch, .. } if branch == branch_id => filter,
        Caller::BranchAdmin { .. } => {
            return Err(AppError::forbidden("You can only view students of your own branch."))
        }
        Caller::Donor(_) => filter.eq("isActive", true),
    };
    views(store, filter).await
}

pub async fn get_by_id(store: &dyn Store, caller: &Caller, id: &str) -> AppResult<StudentView> {
    let student = load(store, id).await?;
    let visible = match caller {
        Caller::Donor(_) => student.is_active,
        _ => caller.manages_branch(&student.branch),
    };
    if !visible {
        return Err(AppError::forbidden("You do not have access to this student."));
    }

    let mut branches = BranchCache::default();
    branches.view(store, student).await
}

pub(crate) async fn load(store: &dyn Store, id: &str) -> AppResult<Student> {
    store::fetch::<Student>(store, id)
        .await?
        .ok_or_else(|| AppError::not_found("Student not found."))
}

async fn existing_branch(store: &dyn Store, id: &str) -> AppResult<Branch> {
    store::fetch::<Branch>(store, id)
        .await?
        .ok_or_else(|| AppError::validation("Selected branch does not exist."))
}

async fn views(store: &dyn Store, filter: Filter) -> AppResult<Vec<StudentView>> {
    let students = store::fetch_all::<Student>(store, &filter).await?;
    resolve_students(store, students).await
}

/// Sorts newest-first and joins each student's branch.
pub(crate) async fn resolve_students(
    store: &dyn Store,
    mut students: Vec<Student>,
) -> AppResult<Vec<StudentView>> {
    students.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut branches = BranchCache::default();
    let mut views = Vec::with_capacity(students.len());
    for student in students {
        views.push(branches.view(store, student).await?);
    }
    Ok(views)
}

/// Memoises branch lookups while a list of records is being resolved.
#[derive(Default)]
pub(crate) struct BranchCache {
    seen: HashMap<String, Option<BranchSummary>>,
}

impl BranchCache {
    pub(crate) async fn summary(
        &mut self,
        store: &dyn Store,
        id: &str,
    ) -> AppResult<Option<BranchSummary>> {
        if let Some(cached) = self.seen.get(id) {
            return Ok(cached.clone());
        }
        let summary = store::fetch::<Branch>(store, id)
            .await?
            .as_ref()
            .map(BranchSummary::from);
        self.seen.insert(id.to_string(), summary.clone());
        Ok(summary)
    }

    async fn view(&mut self, store: &dyn Store, student: Student) -> AppResult<StudentView> {
        let branch_details = self.summary(store, &student.branch).await?;
        Ok(StudentView { student, branch_details })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::memory::MemoryStore;
    use crate::types::{PaymentInfo, Role, User};

    fn user(role: Role, branch: Option<&str>) -> User {
        User {
            id: format!("{:?}", role),
            name: "U".into(),
            email: "u@x.com".into(),
            password_hash: String::new(),
            role,
            branch: branch.map(str::to_string),
            address: None,
            phone_number: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    async fn seed_branch(store: &MemoryStore, id: &str) {
        let branch = Branch {
            id: id.into(),
            name: id.to_uppercase(),
            location: "Somewhere".into(),
            phone_number: "000".into(),
            admin: None,
            payment_info: PaymentInfo {
                account_title: "T".into(),
                bank_name: "B".into(),
                account_number: "1".into(),
            },
            created_at: Utc::now(),
        };
        store::insert(store, &branch).await.unwrap();
    }

    fn enrol(name: &str, branch: Option<&str>) -> CreateStudentRequest {
        CreateStudentRequest {
            name: name.into(),
            branch: branch.map(str::to_string),
            date_of_birth: None,
            guardian_name: None,
            gender: None,
            contact_number: None,
            address: None,
            enrollment_date: None,
            is_active: None,
        }
    }

    #[tokio::test]
    async fn branch_admin_enrolment_is_forced_to_own_branch() {
        let store = MemoryStore::new();
        seed_branch(&store, "b-1").await;
        seed_branch(&store, "b-2").await;
        let admin = Caller::from_user(user(Role::BranchAdmin, Some("b-1"))).unwrap();

        let view = create(&store, &admin, enrol("Ali", Some("b-2"))).await.unwrap();
        assert_eq!(view.student.branch, "b-1");
        assert_eq!(view.student.enrollment_date, Utc::now().date_naive());
        assert!(view.student.is_active);
        assert_eq!(view.branch_details.unwrap().name, "B-1");
    }

    #[tokio::test]
    async fn branch_admin_cannot_move_or_touch_foreign_students() {
        let store = MemoryStore::new();
        seed_branch(&store, "b-1").await;
        seed_branch(&store, "b-2").await;
        let hq = Caller::from_user(user(Role::HeadOfficeAdmin, None)).unwrap();
        let admin = Caller::from_user(user(Role::BranchAdmin, Some("b-1"))).unwrap();

        let own = create(&store, &admin, enrol("Ali", None)).await.unwrap().student;
        let foreign = create(&store, &hq, enrol("Sara", Some("b-2"))).await.unwrap().student;

        let move_req = UpdateStudentRequest {
            branch: Some("b-2".into()),
            ..Default::default()
        };
        let err = update(&store, &admin, &own.id, move_req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let err = delete(&store, &admin, &foreign.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let listed = list_all(&store, &admin, None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].student.id, own.id);
    }

    #[tokio::test]
    async fn head_office_needs_an_existing_branch() {
        let store = MemoryStore::new();
        let hq = Caller::from_user(user(Role::HeadOfficeAdmin, None)).unwrap();

        let missing = create(&store, &hq, enrol("Ali", None)).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Validation);

        let unknown = create(&store, &hq, enrol("Ali", Some("nowhere"))).await.unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn donors_only_see_active_students() {
        let store = MemoryStore::new();
        seed_branch(&store, "b-1").await;
        let hq = Caller::from_user(user(Role::HeadOfficeAdmin, None)).unwrap();
        let donor = Caller::from_user(user(Role::Donor, None)).unwrap();

        create(&store, &hq, enrol("Active", Some("b-1"))).await.unwrap();
        let mut inactive = enrol("Graduated", Some("b-1"));
        inactive.is_active = Some(false);
        let inactive = create(&store, &hq, inactive).await.unwrap().student;

        let names: Vec<String> = list_all(&store, &donor, None)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.student.name)
            .collect();
        assert_eq!(names, vec!["Active".to_string()]);

        let err = get_by_id(&store, &donor, &inactive.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }
}
