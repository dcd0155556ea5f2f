use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, multispace0, multispace1},
    combinator::{all_consuming, map, map_opt, value},
    error::ParseError,
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, tuple},
    IResult,
};

use flowpol_compile::DeviceCapability;
use flowpol_core::r#match::family::Field;

use crate::{
    ast::{PolicyExpr, PredExpr},
    basic::parser::{parse_ident, parse_literal, parse_u32, parse_usize, ws},
    CapabilityLoader, PolicyLoader,
};

/// Untyped syntax trees, turned into predicates and policies once parsing succeeded.
pub mod ast {
    use flowpol_core::{
        action::Action,
        r#match::{family::Field, value::Value, Predicate},
    };
    use flowpol_policy::{self as pol, Policy};

    use crate::LoadError;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum PredExpr<'a> {
        True,
        False,
        /// `match(k=v, ...)`, the conjunction of every pair.
        Match(Vec<(&'a str, &'a str)>),
        And(Box<PredExpr<'a>>, Box<PredExpr<'a>>),
        Or(Box<PredExpr<'a>>, Box<PredExpr<'a>>),
        Not(Box<PredExpr<'a>>),
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum PolicyExpr<'a> {
        Identity,
        Drop,
        Filter(PredExpr<'a>),
        Fwd(u32),
        Modify(&'a str, &'a str),
        Parallel(Box<PolicyExpr<'a>>, Box<PolicyExpr<'a>>),
        Sequential(Box<PolicyExpr<'a>>, Box<PolicyExpr<'a>>),
        If(PredExpr<'a>, Box<PolicyExpr<'a>>, Box<PolicyExpr<'a>>),
    }

    impl PredExpr<'_> {
        pub fn build(&self) -> Result<Predicate, LoadError> {
            Ok(match self {
                PredExpr::True => Predicate::True,
                PredExpr::False => Predicate::False,
                PredExpr::Match(pairs) => pairs.iter().try_fold(Predicate::True, |acc, (k, v)| {
                    Ok::<_, LoadError>(acc & Predicate::matches(k, v)?)
                })?,
                PredExpr::And(a, b) => a.build()? & b.build()?,
                PredExpr::Or(a, b) => a.build()? | b.build()?,
                PredExpr::Not(a) => !a.build()?,
            })
        }
    }

    impl PolicyExpr<'_> {
        pub fn build(&self) -> Result<Policy, LoadError> {
            Ok(match self {
                PolicyExpr::Identity => pol::identity(),
                PolicyExpr::Drop => pol::drop_all(),
                PolicyExpr::Filter(pred) => pol::filter(pred.build()?),
                PolicyExpr::Fwd(port) => pol::fwd(*port),
                PolicyExpr::Modify(field, literal) => {
                    let field: Field = field.parse()?;
                    let value = Value::parse(field, literal)?;
                    pol::act(Action::modify(field, value)?.into())
                }
                PolicyExpr::Parallel(a, b) => pol::parallel(a.build()?, b.build()?),
                PolicyExpr::Sequential(a, b) => pol::sequential(a.build()?, b.build()?),
                PolicyExpr::If(c, a, b) => pol::if_then_else(c.build()?, a.build()?, b.build()?),
            })
        }
    }
}

#[derive(Default)]
pub struct DefaultPolicyLoader;

impl PolicyLoader for DefaultPolicyLoader {
    fn _load<'x, Err: ParseError<&'x str>>(
        &self,
        content: &'x str,
    ) -> IResult<(), PolicyExpr<'x>, Err> {
        let (_, expr) = all_consuming(ws(parse_policy))(content)?;
        Ok(((), expr))
    }
}

fn fold_left<T>(first: T, rest: Vec<T>, join: fn(Box<T>, Box<T>) -> T) -> T {
    rest.into_iter()
        .fold(first, |acc, next| join(Box::new(acc), Box::new(next)))
}

/// policy := seq ('+' seq)*
fn parse_policy<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, PolicyExpr<'a>, E> {
    let (rest, first) = parse_seq(input)?;
    let (rest, others) = many0(preceded(ws(char('+')), parse_seq))(rest)?;
    Ok((rest, fold_left(first, others, PolicyExpr::Parallel)))
}

/// seq := atom ('>>' atom)*
fn parse_seq<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, PolicyExpr<'a>, E> {
    let (rest, first) = parse_atom(input)?;
    let (rest, others) = many0(preceded(ws(tag(">>")), parse_atom))(rest)?;
    Ok((rest, fold_left(first, others, PolicyExpr::Sequential)))
}

fn parse_atom<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, PolicyExpr<'a>, E> {
    alt((
        map(parse_pred, PolicyExpr::Filter),
        delimited(char('('), ws(parse_policy), char(')')),
        parse_if,
        map(
            delimited(tag("fwd("), ws(parse_u32), char(')')),
            PolicyExpr::Fwd,
        ),
        map(
            delimited(
                tag("modify("),
                ws(separated_pair(parse_ident, ws(char('=')), parse_literal)),
                char(')'),
            ),
            |(f, v)| PolicyExpr::Modify(f, v),
        ),
        value(PolicyExpr::Identity, tag("identity")),
        value(PolicyExpr::Drop, tag("drop")),
    ))(input)
}

/// if_(pred, policy, policy)
fn parse_if<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, PolicyExpr<'a>, E> {
    let (rest, (_, cond, _, then, _, otherwise, _)) = tuple((
        tag("if_("),
        ws(parse_pred),
        char(','),
        ws(parse_policy),
        char(','),
        ws(parse_policy),
        char(')'),
    ))(input)?;
    Ok((
        rest,
        PolicyExpr::If(cond, Box::new(then), Box::new(otherwise)),
    ))
}

/// pred := term ('|' term)*
fn parse_pred<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, PredExpr<'a>, E> {
    let (rest, first) = parse_term(input)?;
    let (rest, others) = many0(preceded(ws(char('|')), parse_term))(rest)?;
    Ok((rest, fold_left(first, others, PredExpr::Or)))
}

/// term := factor ('&' factor)*
fn parse_term<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, PredExpr<'a>, E> {
    let (rest, first) = parse_factor(input)?;
    let (rest, others) = many0(preceded(ws(char('&')), parse_factor))(rest)?;
    Ok((rest, fold_left(first, others, PredExpr::And)))
}

fn parse_factor<'a, E: ParseError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, PredExpr<'a>, E> {
    alt((
        map(preceded(pair(char('~'), multispace0), parse_factor), |p| {
            PredExpr::Not(Box::new(p))
        }),
        map(
            delimited(
                tag("match("),
                ws(separated_list1(
                    ws(char(',')),
                    separated_pair(parse_ident, ws(char('=')), parse_literal),
                )),
                char(')'),
            ),
            PredExpr::Match,
        ),
        value(PredExpr::True, tag("true")),
        value(PredExpr::False, tag("false")),
        delimited(char('('), ws(parse_pred), char(')')),
    ))(input)
}

#[derive(Default)]
pub struct DefaultCapLoader;

enum Directive {
    Match(Vec<Field>),
    Rules(usize),
    Levels(u32),
}

fn parse_directive<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Directive, E> {
    alt((
        map(
            preceded(
                pair(tag("match"), multispace1),
                separated_list1(
                    multispace1,
                    map_opt(parse_ident, |s: &str| s.parse::<Field>().ok()),
                ),
            ),
            Directive::Match,
        ),
        map(
            preceded(pair(tag("rules"), multispace1), parse_usize),
            Directive::Rules,
        ),
        map(
            preceded(pair(tag("levels"), multispace1), parse_u32),
            Directive::Levels,
        ),
    ))(input)
}

fn parse_dev<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    preceded(pair(tag("name"), multispace1), parse_ident)(input)
}

impl CapabilityLoader for DefaultCapLoader {
    fn _load<'x, Err: ParseError<&'x str>>(
        &self,
        content: &'x str,
    ) -> IResult<(), (String, DeviceCapability), Err> {
        let (rest, dev) = delimited(multispace0, parse_dev, multispace0)(content)?;
        let (rest, directives) = many0(ws(parse_directive))(rest)?;
        let (_, _) = all_consuming(multispace0)(rest)?;

        let mut caps = DeviceCapability::default();
        for directive in directives {
            match directive {
                Directive::Match(fields) => caps.fields = fields.into_iter().collect(),
                Directive::Rules(n) => caps.max_rules = n,
                Directive::Levels(n) => caps.max_priority_levels = n,
            }
        }
        Ok(((), (dev.to_owned(), caps)))
    }
}
