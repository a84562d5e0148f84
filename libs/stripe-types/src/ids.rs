/// What a Stripe id refers to, judged by its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    PaymentIntent,
    SetupIntent,
    Charge,
    Invoice,
    Subscription,
    CheckoutSession,
    Customer,
    PaymentMethod,
    Event,
    Other,
}

impl ObjectKind {
    pub fn of(id: &str) -> Self {
        const PREFIXES: [(&str, ObjectKind); 10] = [
            ("seti_", ObjectKind::SetupIntent),
            ("pi_", ObjectKind::PaymentIntent),
            ("ch_", ObjectKind::Charge),
            ("py_", ObjectKind::Charge),
            ("in_", ObjectKind::Invoice),
            ("sub_", ObjectKind::Subscription),
            ("cs_", ObjectKind::CheckoutSession),
            ("cus_", ObjectKind::Customer),
            ("pm_", ObjectKind::PaymentMethod),
            ("evt_", ObjectKind::Event),
        ];

        PREFIXES
            .iter()
            .find(|(prefix, _)| id.starts_with(prefix))
            .map(|(_, kind)| *kind)
            .unwrap_or(ObjectKind::Other)
    }

    pub fn is_setup_intent(id: &str) -> bool {
        Self::of(id) == ObjectKind::SetupIntent
    }

    pub fn is_payment_intent(id: &str) -> bool {
        Self::of(id) == ObjectKind::PaymentIntent
    }
}

/// Event ids accepted by the manual replay tool: `evt_` followed by `[A-Za-z0-9_]+`.
pub fn is_valid_event_id(id: &str) -> bool {
    match id.strip_prefix("evt_") {
        Some(rest) => {
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}
