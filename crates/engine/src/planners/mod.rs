//! Recommendations derived from a score and snapshot. No network calls of
//! their own except the arrival advisor's narrative generator.

pub mod arrival;
pub mod parking;
pub mod powder_day;

pub use arrival::{advise_arrival, ArrivalInputs, ArrivalRecommendation};
pub use parking::{predict_parking, ParkingDifficulty, ParkingInputs, ParkingPrediction};
pub use powder_day::{plan_powder_days, DayPlan, PowderDayPlan};
