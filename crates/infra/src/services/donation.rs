use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

use hemobank_core::{Actor, AggregateId, DonorId, FacilityId};
use hemobank_donation::{
    CampaignDonation, CampaignId, CompleteDonation, CorrectResult, DonationCommand, DonationId,
    DonationResult, DonationStatus, SubmitDonation, TransitionDonation,
};
use hemobank_events::EventBus;

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::services::DONATION_AGGREGATE;

/// Donation workflow operations: submission and the status state machine.
pub struct DonationService<S, B>
where
    S: EventStore,
    B: EventBus<JsonValue>,
{
    dispatcher: Arc<CommandDispatcher<S, B>>,
}

impl<S, B> DonationService<S, B>
where
    S: EventStore,
    B: EventBus<JsonValue>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self { dispatcher }
    }

    /// Register a donor's participation in a campaign (starts Pending).
    pub fn submit(
        &self,
        facility_id: FacilityId,
        donor_id: DonorId,
        campaign_id: CampaignId,
        campaign_day: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<CampaignDonation, DispatchError> {
        let donation_id = DonationId::new(AggregateId::new());

        self.dispatcher.dispatch(
            facility_id,
            donation_id.0,
            DONATION_AGGREGATE,
            DonationCommand::SubmitDonation(SubmitDonation {
                facility_id,
                donation_id,
                donor_id,
                campaign_id,
                campaign_day,
                occurred_at: now,
            }),
            |_, id| CampaignDonation::empty(DonationId::new(id)),
        )?;

        info!(donation = %donation_id, donor = %donor_id, campaign = %campaign_id, "donation submitted");
        self.load(facility_id, donation_id)
    }

    /// Move a donation along the transition table.
    ///
    /// `appointment_at` is required when confirming an appointment and
    /// rejected otherwise; donor-initiated cancellation of a confirmed
    /// appointment enforces the 24-hour notice window.
    pub fn transition(
        &self,
        facility_id: FacilityId,
        donation_id: DonationId,
        target: DonationStatus,
        actor: Actor,
        note: Option<String>,
        appointment_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<CampaignDonation, DispatchError> {
        self.dispatcher.dispatch(
            facility_id,
            donation_id.0,
            DONATION_AGGREGATE,
            DonationCommand::TransitionDonation(TransitionDonation {
                facility_id,
                donation_id,
                target,
                actor,
                note,
                appointment_at,
                occurred_at: now,
            }),
            |_, id| CampaignDonation::empty(DonationId::new(id)),
        )?;

        info!(donation = %donation_id, %target, %actor, "donation transitioned");
        self.load(facility_id, donation_id)
    }

    /// Complete a donation, atomically recording its one result.
    pub fn complete(
        &self,
        facility_id: FacilityId,
        donation_id: DonationId,
        actor: Actor,
        note: Option<String>,
        result: DonationResult,
        now: DateTime<Utc>,
    ) -> Result<CampaignDonation, DispatchError> {
        self.dispatcher.dispatch(
            facility_id,
            donation_id.0,
            DONATION_AGGREGATE,
            DonationCommand::CompleteDonation(CompleteDonation {
                facility_id,
                donation_id,
                actor,
                note,
                result,
                occurred_at: now,
            }),
            |_, id| CampaignDonation::empty(DonationId::new(id)),
        )?;

        info!(donation = %donation_id, %actor, "donation completed");
        self.load(facility_id, donation_id)
    }

    /// Staff correction of a previously recorded result.
    pub fn correct_result(
        &self,
        facility_id: FacilityId,
        donation_id: DonationId,
        actor: Actor,
        result: DonationResult,
        now: DateTime<Utc>,
    ) -> Result<CampaignDonation, DispatchError> {
        self.dispatcher.dispatch(
            facility_id,
            donation_id.0,
            DONATION_AGGREGATE,
            DonationCommand::CorrectResult(CorrectResult {
                facility_id,
                donation_id,
                actor,
                result,
                occurred_at: now,
            }),
            |_, id| CampaignDonation::empty(DonationId::new(id)),
        )?;

        info!(donation = %donation_id, %actor, "donation result corrected");
        self.load(facility_id, donation_id)
    }

    /// Rehydrate the authoritative state of one donation.
    pub fn load(
        &self,
        facility_id: FacilityId,
        donation_id: DonationId,
    ) -> Result<CampaignDonation, DispatchError> {
        let donation = self.dispatcher.rehydrate(facility_id, donation_id.0, |_, id| {
            CampaignDonation::empty(DonationId::new(id))
        })?;
        if !donation.exists() {
            return Err(DispatchError::NotFound);
        }
        Ok(donation)
    }
}
