use std::collections::BTreeMap;

use log::debug;
use rust_decimal::Decimal;

use crate::currency::CurrencyCode;
use crate::error::RateError;
use crate::upstream::UpstreamQuotes;

/// Re-expresses every quote as the value of one unit in `base`.
///
/// The upstream's own base is included with value 1 before conversion, and
/// `base` always comes out as exactly 1. Fails without partial output when
/// `base` can't be located in the upstream data.
pub fn normalize(
    upstream: &UpstreamQuotes,
    base: &CurrencyCode,
) -> Result<BTreeMap<CurrencyCode, Decimal>, RateError> {
    let mut in_upstream_base: BTreeMap<CurrencyCode, Decimal> = upstream
        .quotes
        .iter()
        .map(|q| (q.code.clone(), q.value_in_base))
        .collect();
    in_upstream_base.insert(upstream.base.clone(), Decimal::ONE);

    if &upstream.base == base {
        let mut rates = in_upstream_base;
        rates.insert(base.clone(), Decimal::ONE);
        return Ok(rates);
    }

    let base_in_upstream = *in_upstream_base.get(base).ok_or_else(|| {
        RateError::Normalization(format!(
            "{base} is missing from upstream data based on {}",
            upstream.base
        ))
    })?;
    debug!("1 {base} = {base_in_upstream} {}", upstream.base);

    let mut rates = BTreeMap::new();
    for (code, value) in in_upstream_base {
        let rate = value.checked_div(base_in_upstream).ok_or_else(|| {
            RateError::Normalization(format!("can't express {code} in {base}"))
        })?;
        rates.insert(code, rate);
    }
    rates.insert(base.clone(), Decimal::ONE);

    Ok(rates)
}
