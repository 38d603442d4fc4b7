use chrono::NaiveDate;
use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};
use uuid::Uuid;

pub type BotDialogue = Dialogue<State, InMemStorage<State>>;

/// Everything picked so far in the booking flow.
#[derive(Debug, Clone, Default)]
pub struct BookingDraft {
    pub guest_name: String,
    pub guest_phone: String,
    pub car_wash: Option<(Uuid, String)>,
    pub date: Option<NaiveDate>,
    /// Slot id and its "HH:MM, bay N" label.
    pub slot: Option<(Uuid, String)>,
    pub wash_type: Option<(Uuid, String)>,
    pub final_price: i64,
    pub prepayment: i64,
    pub car_plate: String,
    pub car_model: String,
}

#[derive(Debug, Clone, Default)]
pub struct CarWashDraft {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub enum State {
    #[default]
    Idle,
    RegisterName,
    RegisterContact {
        name: String,
    },
    /// Inline steps: car wash, date, slot, wash type.
    Booking(BookingDraft),
    BookingPlate(BookingDraft),
    BookingModel(BookingDraft),
    BookingConfirm(BookingDraft),
    AdminVerifyQr {
        car_wash_id: Uuid,
    },
    AdminNewCarWash(CarWashDraft),
    AdminAddBay {
        car_wash_id: Uuid,
    },
}
