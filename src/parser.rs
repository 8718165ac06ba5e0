use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_until, take_while1},
    character::complete::{char, digit1, multispace1},
    combinator::{map, map_res, opt, recognize},
    sequence::{delimited, preceded, tuple},
    IResult,
};

/// A line typed into `geotrail-cli`.
#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Ping,
    Send {
        user_id: String,
        lat: f64,
        lon: f64,
        acc: Option<f64>,
        provider: Option<String>,
        ts: Option<i64>,
    },
    Latest { user_id: String },
    History { user_id: String },
    Help,
    Exit,
}

// --- BASIC PARSERS ---

fn parse_float(input: &str) -> IResult<&str, f64> {
    let (input, num_str) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(tuple((char('.'), digit1))),
    )))(input)?;
    match num_str.parse::<f64>() {
        Ok(n) => Ok((input, n)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float))),
    }
}

fn parse_i64(input: &str) -> IResult<&str, i64> {
    map_res(digit1, |s: &str| s.parse::<i64>())(input)
}

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    map(
        alt((
            delimited(char('\''), take_until("'"), char('\'')),
            delimited(char('"'), take_until("\""), char('"')),
        )),
        |s: &str| s.to_string(),
    )(input)
}

/// A quoted string, or a bare run of non-whitespace.
fn parse_word(input: &str) -> IResult<&str, String> {
    alt((
        parse_quoted_string,
        map(take_while1(|c: char| !c.is_whitespace()), |s: &str| s.to_string()),
    ))(input)
}

// --- HELPERS ---

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

/// `KEYWORD value`, preceded by whitespace.
fn keyword_arg<'a, O>(
    keyword: &'static str,
    value: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    preceded(tuple((multispace1, tag_ci(keyword), multispace1)), value)
}

// --- COMMAND PARSERS ---

fn parse_ping(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("PING")(input)?;
    Ok((input, Command::Ping))
}

fn parse_send(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("SEND")(input)?;
    let (input, user_id) = preceded(multispace1, parse_word)(input)?;
    let (input, lat) = preceded(multispace1, parse_float)(input)?;
    let (input, lon) = preceded(multispace1, parse_float)(input)?;

    let (input, acc) = opt(keyword_arg("ACC", parse_float))(input)?;
    let (input, provider) = opt(keyword_arg("VIA", parse_word))(input)?;
    let (input, ts) = opt(keyword_arg("AT", parse_i64))(input)?;

    Ok((input, Command::Send { user_id, lat, lon, acc, provider, ts }))
}

fn parse_latest(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("LATEST")(input)?;
    let (input, user_id) = preceded(multispace1, parse_word)(input)?;
    Ok((input, Command::Latest { user_id }))
}

fn parse_history(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("HISTORY")(input)?;
    let (input, user_id) = preceded(multispace1, parse_word)(input)?;
    Ok((input, Command::History { user_id }))
}

fn parse_help(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("HELP")(input)?;
    Ok((input, Command::Help))
}

fn parse_exit(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("EXIT"), tag_ci("QUIT")))(input)?;
    Ok((input, Command::Exit))
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let result = alt((
        parse_ping,
        parse_send,
        parse_latest,
        parse_history,
        parse_help,
        parse_exit,
    ))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder.trim()));
            }
            Ok(cmd)
        },
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context = if e.input.chars().count() > 20 {
                format!("{}...", e.input.chars().take(20).collect::<String>())
            } else {
                e.input.to_string()
            };
            Err(format!("Invalid syntax near: '{}'", context))
        },
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}
