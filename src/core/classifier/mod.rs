pub const SHORT_FORM_MAX_SECS: u64 = 180;

#[derive(Debug, Clone, Default)]
pub struct ClassifierService;

impl ClassifierService {
    pub fn name(&self) -> &'static str {
        "classifier"
    }

    pub fn status(&self) -> &'static str {
        "ready"
    }
}

pub fn is_short_form(duration: &str) -> bool {
    parse_duration_secs(duration).is_some_and(|secs| secs <= SHORT_FORM_MAX_SECS)
}

// Partial seconds round up.
pub fn parse_duration_secs(duration: &str) -> Option<u64> {
    let rest = duration.trim().strip_prefix("PT")?;
    if rest.is_empty() {
        return None;
    }

    let mut total = 0_u64;
    let mut last_rank = 0_u8;
    let mut digits = String::new();
    let mut fraction = false;
    let mut partial_second = false;
    for ch in rest.chars() {
        match ch {
            '0'..='9' => {
                if fraction {
                    partial_second |= ch != '0';
                } else {
                    digits.push(ch);
                }
            }
            // A partial second counts as a whole one.
            '.' if !digits.is_empty() && !fraction => fraction = true,
            'H' | 'M' | 'S' => {
                let (rank, multiplier) = match ch {
                    'H' => (1, 3_600),
                    'M' => (2, 60),
                    _ => (3, 1),
                };
                if digits.is_empty() || rank <= last_rank || (fraction && ch != 'S') {
                    return None;
                }
                let value: u64 = digits.parse().ok()?;
                let value = value.checked_add(u64::from(partial_second))?;
                total = total.checked_add(value.checked_mul(multiplier)?)?;
                last_rank = rank;
                digits.clear();
                fraction = false;
                partial_second = false;
            }
            _ => return None,
        }
    }

    if !digits.is_empty() || fraction {
        return None;
    }
    Some(total)
}
