//! In-memory mock implementations for the invoicing store and hook ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use getpaid_stripe_types::{Event, Subscription as RemoteSubscription};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::{
            correlation_cache::CorrelationCache,
            hooks::BillingHooks,
            store::{InvoiceRepo, MetaScope, MetaStore, RenewalPayment, SubscriptionRepo},
        },
    },
    domain::entities::{
        invoice::{Invoice, InvoiceStatus},
        subscription::{Subscription, SubscriptionStatus},
    },
};

// ============================================================================
// InMemoryCorrelationCache
// ============================================================================

/// Correlation cache whose entries never expire.
#[derive(Default)]
pub struct InMemoryCorrelationCache {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryCorrelationCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CorrelationCache for InMemoryCorrelationCache {
    async fn put(&self, key: &str, value: &str, _ttl: Duration) -> AppResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

// ============================================================================
// InMemoryInvoiceRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryInvoiceRepo {
    pub invoices: Mutex<HashMap<i64, Invoice>>,
    notes: Mutex<HashMap<i64, Vec<(String, bool)>>>,
    mark_paid_calls: Mutex<HashMap<i64, usize>>,
    status_writes: Mutex<HashMap<i64, usize>>,
    refund_calls: Mutex<HashMap<i64, usize>>,
    renewals: Mutex<Vec<(i64, RenewalPayment)>>,
    renewal_ids: Mutex<HashMap<(i64, String), i64>>,
    fail_mark_paid: AtomicBool,
    fail_renewal: AtomicBool,
}

impl InMemoryInvoiceRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, invoice: Invoice) -> Invoice {
        self.invoices
            .lock()
            .unwrap()
            .insert(invoice.id, invoice.clone());
        invoice
    }

    pub fn get(&self, id: i64) -> Option<Invoice> {
        self.invoices.lock().unwrap().get(&id).cloned()
    }

    pub fn notes(&self, id: i64) -> Vec<String> {
        self.notes
            .lock()
            .unwrap()
            .get(&id)
            .map(|notes| notes.iter().map(|(note, _)| note.clone()).collect())
            .unwrap_or_default()
    }

    pub fn mark_paid_count(&self, id: i64) -> usize {
        self.mark_paid_calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    /// Number of writes that changed the stored status.
    pub fn status_changes(&self, id: i64) -> usize {
        self.status_writes.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn refund_count(&self, id: i64) -> usize {
        self.refund_calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    /// `(subscription_id, payment)` for every renewal invoice created.
    pub fn renewals(&self) -> Vec<(i64, RenewalPayment)> {
        self.renewals.lock().unwrap().clone()
    }

    /// Makes the next `mark_paid` or `record_payment` fail with a database error.
    pub fn fail_next_mark_paid(&self) {
        self.fail_mark_paid.store(true, Ordering::SeqCst);
    }

    /// Makes the next `create_renewal` fail before anything is stored.
    pub fn fail_next_renewal(&self) {
        self.fail_renewal.store(true, Ordering::SeqCst);
    }

    fn take_failure(flag: &AtomicBool) -> AppResult<()> {
        if flag.swap(false, Ordering::SeqCst) {
            return Err(AppError::Database("connection reset".into()));
        }
        Ok(())
    }

    fn write_status(&self, id: i64, status: InvoiceStatus) -> AppResult<()> {
        let mut invoices = self.invoices.lock().unwrap();
        let invoice = invoices.get_mut(&id).ok_or(AppError::NotFound)?;
        invoice.status = status;
        *self.status_writes.lock().unwrap().entry(id).or_default() += 1;
        Ok(())
    }

    fn update(&self, id: i64, apply: impl FnOnce(&mut Invoice)) -> AppResult<()> {
        let mut invoices = self.invoices.lock().unwrap();
        let invoice = invoices.get_mut(&id).ok_or(AppError::NotFound)?;
        apply(invoice);
        Ok(())
    }
}

#[async_trait]
impl InvoiceRepo for InMemoryInvoiceRepo {
    async fn get_by_id(&self, id: i64) -> AppResult<Option<Invoice>> {
        Ok(self.get(id))
    }

    async fn get_by_key(&self, key: &str) -> AppResult<Option<Invoice>> {
        Ok(self
            .invoices
            .lock()
            .unwrap()
            .values()
            .find(|i| i.key == key)
            .cloned())
    }

    async fn get_by_transaction_id(&self, transaction_id: &str) -> AppResult<Option<Invoice>> {
        Ok(self
            .invoices
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.has_transaction_id(transaction_id))
            .min_by_key(|i| i.id)
            .cloned())
    }

    async fn mark_paid(&self, id: i64) -> AppResult<()> {
        Self::take_failure(&self.fail_mark_paid)?;
        self.write_status(id, InvoiceStatus::Paid)?;
        *self.mark_paid_calls.lock().unwrap().entry(id).or_default() += 1;
        Ok(())
    }

    async fn set_status(&self, id: i64, status: InvoiceStatus) -> AppResult<()> {
        self.write_status(id, status)
    }

    async fn set_transaction_id(&self, id: i64, transaction_id: &str) -> AppResult<()> {
        self.update(id, |i| i.transaction_id = Some(transaction_id.to_string()))
    }

    async fn set_remote_subscription_id(&self, id: i64, remote_id: &str) -> AppResult<()> {
        self.update(id, |i| i.remote_subscription_id = Some(remote_id.to_string()))
    }

    async fn refund(&self, id: i64) -> AppResult<()> {
        self.write_status(id, InvoiceStatus::Refunded)?;
        *self.refund_calls.lock().unwrap().entry(id).or_default() += 1;
        Ok(())
    }

    async fn add_note(&self, id: i64, note: &str, customer_visible: bool) -> AppResult<()> {
        self.notes
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .push((note.to_string(), customer_visible));
        Ok(())
    }

    async fn record_payment(&self, id: i64, transaction_id: &str, note: &str) -> AppResult<()> {
        Self::take_failure(&self.fail_mark_paid)?;
        if self.get(id).is_none() {
            return Err(AppError::NotFound);
        }
        self.update(id, |i| i.transaction_id = Some(transaction_id.to_string()))?;
        self.add_note(id, note, false).await?;
        self.write_status(id, InvoiceStatus::Paid)?;
        *self.mark_paid_calls.lock().unwrap().entry(id).or_default() += 1;
        Ok(())
    }

    async fn get_renewal(
        &self,
        subscription_id: i64,
        transaction_id: &str,
    ) -> AppResult<Option<Invoice>> {
        let id = self
            .renewal_ids
            .lock()
            .unwrap()
            .get(&(subscription_id, transaction_id.to_string()))
            .copied();
        Ok(id.and_then(|id| self.get(id)))
    }

    async fn create_renewal(
        &self,
        subscription: &Subscription,
        payment: &RenewalPayment,
    ) -> AppResult<Invoice> {
        Self::take_failure(&self.fail_renewal)?;
        let mut invoices = self.invoices.lock().unwrap();
        let parent = invoices
            .get(&subscription.parent_invoice_id)
            .cloned()
            .ok_or(AppError::NotFound)?;

        let id = invoices.keys().max().copied().unwrap_or(0) + 1;
        let renewal = Invoice {
            id,
            key: format!("{}_renewal_{id}", parent.key),
            number: format!("{}-R{id}", parent.number),
            status: InvoiceStatus::Paid,
            total: subscription.recurring_amount,
            transaction_id: Some(payment.transaction_id.clone()),
            created_at: payment.created_at,
            ..parent
        };
        invoices.insert(id, renewal.clone());
        self.renewal_ids
            .lock()
            .unwrap()
            .insert((subscription.id, payment.transaction_id.clone()), id);
        self.renewals
            .lock()
            .unwrap()
            .push((subscription.id, payment.clone()));
        Ok(renewal)
    }
}

// ============================================================================
// InMemorySubscriptionRepo
// ============================================================================

#[derive(Default)]
pub struct InMemorySubscriptionRepo {
    pub subscriptions: Mutex<HashMap<i64, Subscription>>,
    renew_calls: Mutex<HashMap<i64, usize>>,
    fail_renew: AtomicBool,
}

impl InMemorySubscriptionRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, subscription: Subscription) -> Subscription {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.id, subscription.clone());
        subscription
    }

    pub fn get(&self, id: i64) -> Option<Subscription> {
        self.subscriptions.lock().unwrap().get(&id).cloned()
    }

    pub fn renew_count(&self, id: i64) -> usize {
        self.renew_calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    /// Makes the next `renew` fail with a database error.
    pub fn fail_next_renew(&self) {
        self.fail_renew.store(true, Ordering::SeqCst);
    }

    fn update(&self, id: i64, apply: impl FnOnce(&mut Subscription)) -> AppResult<()> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let subscription = subscriptions.get_mut(&id).ok_or(AppError::NotFound)?;
        apply(subscription);
        Ok(())
    }

    fn sorted(&self, filter: impl Fn(&Subscription) -> bool) -> Vec<Subscription> {
        let mut found: Vec<Subscription> = self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| filter(s))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.id);
        found
    }
}

#[async_trait]
impl SubscriptionRepo for InMemorySubscriptionRepo {
    async fn get_by_id(&self, id: i64) -> AppResult<Option<Subscription>> {
        Ok(self.get(id))
    }

    async fn get_by_profile_id(&self, profile_id: &str) -> AppResult<Option<Subscription>> {
        Ok(self
            .sorted(|s| s.profile_id.as_deref() == Some(profile_id))
            .into_iter()
            .next())
    }

    async fn list_by_invoice(&self, invoice_id: i64) -> AppResult<Vec<Subscription>> {
        Ok(self.sorted(|s| s.parent_invoice_id == invoice_id))
    }

    async fn list_by_status(&self, statuses: &[SubscriptionStatus]) -> AppResult<Vec<Subscription>> {
        Ok(self.sorted(|s| statuses.contains(&s.status)))
    }

    async fn set_profile_id(&self, id: i64, profile_id: &str) -> AppResult<()> {
        self.update(id, |s| s.profile_id = Some(profile_id.to_string()))
    }

    async fn activate(&self, id: i64) -> AppResult<()> {
        self.update(id, |s| {
            s.status = if s.is_trialing {
                SubscriptionStatus::Trialing
            } else {
                SubscriptionStatus::Active
            };
        })
    }

    async fn set_dates(
        &self,
        id: i64,
        created_at: Option<DateTime<Utc>>,
        expiration: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        self.update(id, |s| {
            if let Some(created_at) = created_at {
                s.created_at = created_at;
            }
            if expiration.is_some() {
                s.expiration = expiration;
            }
        })
    }

    async fn set_expiration(&self, id: i64, expiration: DateTime<Utc>) -> AppResult<()> {
        self.update(id, |s| s.expiration = Some(expiration))
    }

    async fn renew(&self, id: i64, period_start: DateTime<Utc>) -> AppResult<()> {
        if self.fail_renew.swap(false, Ordering::SeqCst) {
            return Err(AppError::Database("connection reset".into()));
        }
        self.update(id, |s| {
            let frequency = u32::try_from(s.frequency.max(1)).unwrap_or(1);
            s.status = SubscriptionStatus::Active;
            s.is_trialing = false;
            s.expiration = s.period.advance(period_start, frequency).or(s.expiration);
        })?;
        *self.renew_calls.lock().unwrap().entry(id).or_default() += 1;
        Ok(())
    }

    async fn failing(&self, id: i64) -> AppResult<()> {
        self.update(id, |s| s.status = SubscriptionStatus::Failing)
    }

    async fn cancel(&self, id: i64) -> AppResult<()> {
        self.update(id, |s| s.status = SubscriptionStatus::Cancelled)
    }
}

// ============================================================================
// InMemoryMetaStore
// ============================================================================

#[derive(Default)]
pub struct InMemoryMetaStore {
    pub entries: Mutex<HashMap<(MetaScope, String), String>>,
}

impl InMemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaStore for InMemoryMetaStore {
    async fn get_meta(&self, scope: MetaScope, key: &str) -> AppResult<Option<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&(scope, key.to_string()))
            .cloned())
    }

    async fn set_meta(&self, scope: MetaScope, key: &str, value: &str) -> AppResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert((scope, key.to_string()), value.to_string());
        Ok(())
    }

    async fn delete_meta(&self, scope: MetaScope, key: &str) -> AppResult<bool> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .remove(&(scope, key.to_string()))
            .is_some())
    }

    async fn swap_meta(
        &self,
        scope: MetaScope,
        key: &str,
        value: &str,
    ) -> AppResult<Option<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .insert((scope, key.to_string()), value.to_string()))
    }

    async fn claim_meta(&self, scope: MetaScope, key: &str, value: &str) -> AppResult<bool> {
        let mut entries = self.entries.lock().unwrap();
        let entry = (scope, key.to_string());
        if entries.contains_key(&entry) {
            return Ok(false);
        }
        entries.insert(entry, value.to_string());
        Ok(true)
    }

    async fn find_invoice_id(&self, key: &str, value: &str) -> AppResult<Option<i64>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|((scope, k), v)| match scope {
                MetaScope::Invoice(id) if k == key && v == value => Some(*id),
                _ => None,
            })
            .min())
    }
}

// ============================================================================
// RecordingHooks
// ============================================================================

#[derive(Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<(String, String)>>,
    statuses: Mutex<Vec<(i64, String)>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(event_type, event_id)` for every dispatched event.
    pub fn events(&self) -> Vec<(String, String)> {
        self.events.lock().unwrap().clone()
    }

    /// `(local_subscription_id, remote_status)` for every status notification.
    pub fn statuses(&self) -> Vec<(i64, String)> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl BillingHooks for RecordingHooks {
    async fn stripe_event(&self, event_type: &str, event: &Event) {
        self.events
            .lock()
            .unwrap()
            .push((event_type.to_string(), event.id.clone()));
    }

    async fn subscription_status(&self, subscription: &Subscription, remote: &RemoteSubscription) {
        self.statuses
            .lock()
            .unwrap()
            .push((subscription.id, remote.status.to_string()));
    }
}
