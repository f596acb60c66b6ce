//! Full JSON export of every collection (admin only).

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::documents::DocumentKind;
use crate::server::accounts::UserResponse;
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::auth::AuthenticatedUser;
use crate::server::database::{User, Vehicle};
use crate::server::documents::DocumentResponse;
use crate::server::handlers::AppState;
use crate::server::transfers::TransferResponse;

/// How the export is laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupBy {
    /// One list per collection
    #[default]
    Kind,
    /// One bundle per owning user
    User,
}

impl GroupBy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "kind" => Some(GroupBy::Kind),
            "user" => Some(GroupBy::User),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub group_by: Option<String>,
}

/// Every record of one owner (or of everyone, when grouped by kind).
#[derive(Debug, Default, Serialize)]
pub struct Collections {
    pub vehicles: Vec<Vehicle>,
    pub transfers: Vec<TransferResponse>,
    pub documents: BTreeMap<&'static str, Vec<DocumentResponse>>,
}

impl Collections {
    fn with_all_kinds() -> Self {
        Self {
            documents: DocumentKind::ALL
                .into_iter()
                .map(|kind| (kind.slug(), Vec::new()))
                .collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OwnerExport {
    pub owner_id: String,
    /// `None` when the owning account no longer exists
    pub user: Option<UserResponse>,
    #[serde(flatten)]
    pub collections: Collections,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ExportBody {
    ByKind(Collections),
    ByUser { owners: Vec<OwnerExport> },
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub exported_at: NaiveDateTime,
    pub today: NaiveDate,
    pub group_by: &'static str,
    #[serde(flatten)]
    pub body: ExportBody,
}

async fn load_everything(
    state: &AppState,
    today: NaiveDate,
) -> Result<(Vec<Vehicle>, Vec<TransferResponse>, Vec<DocumentResponse>), ApiError> {
    let vehicles = state.db.all_vehicles().await?;
    let transfers = state
        .db
        .all_transfers()
        .await?
        .into_iter()
        .map(TransferResponse::from)
        .collect();

    let mut documents = Vec::new();
    for kind in DocumentKind::ALL {
        let window_days = state.window_days(kind);
        documents.extend(
            state
                .db
                .all_documents(kind)
                .await?
                .into_iter()
                .map(|doc| DocumentResponse::new(kind, doc, today, window_days)),
        );
    }

    Ok((vehicles, transfers, documents))
}

/// `GET /api/v1/export?group_by=kind|user`
pub async fn export_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ExportQuery>,
) -> Result<Json<ExportResponse>, ApiError> {
    user.require_admin()?;

    let group_by = match query.group_by.as_deref() {
        None => GroupBy::default(),
        Some(raw) => GroupBy::parse(raw).ok_or_else(|| {
            ApiError::with_message(
                ErrorCode::InvalidRequest,
                format!("group_by must be 'kind' or 'user', got '{raw}'"),
            )
        })?,
    };

    let today = state.today();
    let (vehicles, transfers, documents) = load_everything(&state, today).await?;
    info!(
        "Export requested by {}: {} vehicles, {} transfers, {} documents",
        user.username,
        vehicles.len(),
        transfers.len(),
        documents.len()
    );

    let (label, body) = match group_by {
        GroupBy::Kind => {
            let mut all = Collections::with_all_kinds();
            all.vehicles = vehicles;
            all.transfers = transfers;
            for doc in documents {
                all.documents.entry(doc.kind).or_default().push(doc);
            }
            ("kind", ExportBody::ByKind(all))
        }
        GroupBy::User => {
            let users = state.db.list_users().await?;
            let owners = group_by_owner(users, vehicles, transfers, documents);
            ("user", ExportBody::ByUser { owners })
        }
    };

    Ok(Json(ExportResponse {
        exported_at: Utc::now().naive_utc(),
        today,
        group_by: label,
        body,
    }))
}

fn group_by_owner(
    users: Vec<User>,
    vehicles: Vec<Vehicle>,
    transfers: Vec<TransferResponse>,
    documents: Vec<DocumentResponse>,
) -> Vec<OwnerExport> {
    let mut owners: BTreeMap<String, OwnerExport> = BTreeMap::new();

    fn slot<'a>(
        owners: &'a mut BTreeMap<String, OwnerExport>,
        owner_id: &str,
    ) -> &'a mut Collections {
        &mut owners
            .entry(owner_id.to_string())
            .or_insert_with(|| OwnerExport {
                owner_id: owner_id.to_string(),
                user: None,
                collections: Collections::with_all_kinds(),
            })
            .collections
    }

    for user in users {
        owners.insert(
            user.id.clone(),
            OwnerExport {
                owner_id: user.id.clone(),
                user: Some(user.into()),
                collections: Collections::with_all_kinds(),
            },
        );
    }
    for vehicle in vehicles {
        let owner_id = vehicle.owner_id.clone();
        slot(&mut owners, &owner_id).vehicles.push(vehicle);
    }
    for transfer in transfers {
        let owner_id = transfer.owner_id.clone();
        slot(&mut owners, &owner_id).transfers.push(transfer);
    }
    for doc in documents {
        let owner_id = doc.owner_id.clone();
        slot(&mut owners, &owner_id)
            .documents
            .entry(doc.kind)
            .or_default()
            .push(doc);
    }

    owners.into_values().collect()
}
