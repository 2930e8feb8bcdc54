//! Shift check-in/out handlers
//!
//! The GPS fix is checked against the cached site's geofence when the site
//! is known locally. An unknown site is accepted; the server has the final
//! word once the operation is delivered.

use anyhow::{bail, Result};
use chrono::Utc;

use punchclock_core::models::ShiftStatus;
use punchclock_core::{EntityType, GeoPoint, OperationKind, Shift, Site, SyncEntity};

use crate::app::App;
use crate::output::Output;

/// Where a fix lies relative to a site's geofence
#[derive(Debug, Clone, PartialEq)]
pub enum GeofenceCheck {
    Inside,
    Outside { distance_m: f64, radius_m: f64 },
    UnknownSite,
}

pub fn check_geofence(site: Option<&Site>, point: &GeoPoint) -> GeofenceCheck {
    match site {
        None => GeofenceCheck::UnknownSite,
        Some(site) if site.contains(point) => GeofenceCheck::Inside,
        Some(site) => GeofenceCheck::Outside {
            distance_m: site.location.distance_to(point),
            radius_m: site.radius_m,
        },
    }
}

/// Arguments shared by check-in and check-out
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
    /// Accept a fix outside the geofence
    pub force: bool,
}

impl Fix {
    fn point(&self) -> GeoPoint {
        GeoPoint {
            accuracy_m: self.accuracy_m,
            ..GeoPoint::new(self.latitude, self.longitude)
        }
    }
}

/// Check in to a shift, creating it locally when it is not cached
pub async fn check_in(
    app: &App,
    shift_id: String,
    user_id: Option<String>,
    site_id: Option<String>,
    fix: Fix,
    output: &Output,
) -> Result<()> {
    let (mut shift, kind) = match cached_shift(app, &shift_id).await {
        Some(shift) => (shift, OperationKind::Update),
        None => {
            let (Some(user_id), Some(site_id)) = (user_id, site_id) else {
                bail!(
                    "Shift '{}' is not known on this device. Pass --user and --site to create it.",
                    shift_id
                );
            };
            (Shift::new(shift_id, user_id, site_id), OperationKind::Create)
        }
    };

    if shift.check_in.is_some() {
        bail!("Already checked in to shift '{}'", shift.id);
    }

    let point = fix.point();
    verify_location(app, &shift.site_id, &point, fix.force, output).await?;

    shift.check_in(point, Utc::now());
    let op = app.engine.enqueue(kind, SyncEntity::Shift(shift)).await;
    output.print_enqueued(&op);
    Ok(())
}

/// Check out of a shift
pub async fn check_out(app: &App, shift_id: String, fix: Fix, output: &Output) -> Result<()> {
    let Some(mut shift) = cached_shift(app, &shift_id).await else {
        bail!("Shift '{}' is not known on this device", shift_id);
    };

    if shift.status != ShiftStatus::InProgress || shift.check_in.is_none() {
        bail!("Shift '{}' is not checked in", shift.id);
    }

    let point = fix.point();
    verify_location(app, &shift.site_id, &point, fix.force, output).await?;

    shift.check_out(point, Utc::now());
    let worked = shift.worked();
    let op = app
        .engine
        .enqueue(OperationKind::Update, SyncEntity::Shift(shift))
        .await;
    output.print_enqueued(&op);
    if let Some(worked) = worked {
        output.message(&format!(
            "  Worked: {}h {:02}m",
            worked.num_hours(),
            worked.num_minutes() % 60
        ));
    }
    Ok(())
}

async fn cached_shift(app: &App, id: &str) -> Option<Shift> {
    match app.engine.replica().get(EntityType::Shift, id).await? {
        SyncEntity::Shift(shift) => Some(shift),
        _ => None,
    }
}

async fn verify_location(
    app: &App,
    site_id: &str,
    point: &GeoPoint,
    force: bool,
    output: &Output,
) -> Result<()> {
    let site = match app.engine.replica().get(EntityType::Site, site_id).await {
        Some(SyncEntity::Site(site)) => Some(site),
        _ => None,
    };

    match check_geofence(site.as_ref(), point) {
        GeofenceCheck::Inside => Ok(()),
        GeofenceCheck::UnknownSite => {
            output.warn(&format!(
                "Site '{}' is not cached; location not verified",
                site_id
            ));
            Ok(())
        }
        GeofenceCheck::Outside {
            distance_m,
            radius_m,
        } => {
            let msg = format!(
                "Location is {:.0} m from site '{}' (allowed {:.0} m)",
                distance_m, site_id, radius_m
            );
            if force {
                output.warn(&msg);
                Ok(())
            } else {
                bail!("{}. Use --force to record it anyway.", msg)
            }
        }
    }
}
