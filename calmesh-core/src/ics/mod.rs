//! ICS (RFC 5545) encoding and decoding of single VEVENTs.
//!
//! The codec is line-based: it unfolds content lines, splits them into
//! name/parameters/value and only looks at the first VEVENT of a VCALENDAR.

mod generate;
mod line;
mod parse;
mod timezone;

pub use generate::generate_ics;
pub use parse::parse_event;
pub use timezone::zoned_to_utc;
