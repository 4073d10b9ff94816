//! CPF (Brazilian taxpayer id) masking and check-digit validation.

/// Keep only ASCII digits.
pub fn digits(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Apply the `000.000.000-00` mask to whatever digits were typed so far.
pub fn format(input: &str) -> String {
    let d: String = digits(input).chars().take(11).collect();
    let mut out = String::with_capacity(14);
    for (i, c) in d.chars().enumerate() {
        match i {
            3 | 6 => out.push('.'),
            9 => out.push('-'),
            _ => {}
        }
        out.push(c);
    }
    out
}

/// True once the field holds a fully formatted CPF.
pub fn is_complete(value: &str) -> bool {
    let b = value.as_bytes();
    b.len() == 14
        && b.iter().enumerate().all(|(i, c)| match i {
            3 | 7 => *c == b'.',
            11 => *c == b'-',
            _ => c.is_ascii_digit(),
        })
}

/// Validate the two check digits.
pub fn is_valid(value: &str) -> bool {
    let d: Vec<u32> = digits(value).chars().filter_map(|c| c.to_digit(10)).collect();
    if d.len() != 11 || d.iter().all(|x| *x == d[0]) {
        return false;
    }
    let check = |len: usize| {
        let sum: u32 = d[..len].iter().enumerate().map(|(i, x)| x * (len as u32 + 1 - i as u32)).sum();
        let r = sum * 10 % 11;
        if r == 10 { 0 } else { r }
    };
    check(9) == d[9] && check(10) == d[10]
}
