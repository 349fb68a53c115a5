pub mod oltp;

use opentelemetry::global;
use opentelemetry::metrics::Meter;

pub fn get_meter() -> Meter {
    global::meter_provider().meter("fathom")
}
