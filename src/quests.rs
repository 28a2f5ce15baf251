use crate::error::ArcadeError;
use crate::hint::TextModel;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Difficulty::Beginner => write!(f, "Beginner"),
            Difficulty::Intermediate => write!(f, "Intermediate"),
            Difficulty::Advanced => write!(f, "Advanced"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    pub ty: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestSchema {
    pub table_name: String,
    pub columns: Vec<SchemaColumn>,
}

/// One quest: a story, a task, and the reference query that grades it.
/// Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quest {
    pub id: String,
    pub title: String,
    pub description: String,
    pub long_description: String,
    pub difficulty: Difficulty,
    pub category: String,
    pub initial_query: String,
    pub correct_query: String,
    pub success_message: String,
    pub schema: Vec<QuestSchema>,
}

impl Quest {
    /// Tables the quest declares, used for live schema context.
    pub fn table_names(&self) -> Vec<&str> {
        self.schema.iter().map(|s| s.table_name.as_str()).collect()
    }
}

fn table(name: &str, cols: &[(&str, &str)]) -> QuestSchema {
    QuestSchema {
        table_name: name.to_string(),
        columns: cols
            .iter()
            .map(|(n, t)| SchemaColumn {
                name: n.to_string(),
                ty: t.to_string(),
            })
            .collect(),
    }
}

#[allow(clippy::too_many_arguments)]
fn quest(
    id: &str,
    title: &str,
    description: &str,
    long_description: &str,
    difficulty: Difficulty,
    category: &str,
    initial_query: &str,
    correct_query: &str,
    success_message: &str,
    schema: Vec<QuestSchema>,
) -> Quest {
    Quest {
        id: id.into(),
        title: title.into(),
        description: description.into(),
        long_description: long_description.into(),
        difficulty,
        category: category.into(),
        initial_query: initial_query.into(),
        correct_query: correct_query.into(),
        success_message: success_message.into(),
        schema,
    }
}

fn employees_full() -> QuestSchema {
    table(
        "EMPLOYEES",
        &[
            ("Fname", "VARCHAR(20)"),
            ("Lname", "VARCHAR(20)"),
            ("Ssn", "CHAR(9)"),
            ("Sex", "CHAR(1)"),
            ("Salary", "INT"),
            ("Super_ssn", "CHAR(9)"),
            ("Dno", "INT"),
        ],
    )
}

/// The built-in quest catalog, in curriculum order.
pub fn builtin() -> &'static [Quest] {
    static QUESTS: OnceLock<Vec<Quest>> = OnceLock::new();
    QUESTS.get_or_init(|| {
        vec![
            quest(
                "select-basics",
                "The SELECT Statement",
                "Learn to retrieve data from a table.",
                "The kingdom's scribe has recorded all the royal employees in a table, but the \
                 records are magically sealed. Use your SQL knowledge to unseal them! Write a \
                 query to select all columns and all rows from the `EMPLOYEES` table.",
                Difficulty::Beginner,
                "SQL Basics",
                "SELECT * FROM EMPLOYEES;",
                "SELECT * FROM EMPLOYEES",
                "You have successfully retrieved all employee records. Great job!",
                vec![employees_full()],
            ),
            quest(
                "where-clause",
                "The WHERE Clause",
                "Filter records based on a condition.",
                "The royal treasurer wants a list of all employees who earn more than 70,000 \
                 gold pieces. Use the WHERE clause to filter the `EMPLOYEES` table and find \
                 these high-earners.",
                Difficulty::Beginner,
                "SQL Basics",
                "SELECT Fname, Lname FROM EMPLOYEES\nWHERE Salary > 70000;",
                "SELECT Fname, Lname FROM EMPLOYEES WHERE Salary > 70000",
                "Excellent! You have successfully filtered the records.",
                vec![table(
                    "EMPLOYEES",
                    &[
                        ("Fname", "VARCHAR(20)"),
                        ("Lname", "VARCHAR(20)"),
                        ("Salary", "INT"),
                    ],
                )],
            ),
            quest(
                "insert-knight",
                "INSERT Knight",
                "Master adding new rows of data.",
                "A new knight, Sir Galahad, has joined the Round Table! His salary is 55,000, \
                 SSN is 777777777, he reports to Sir Lancelot (222222222), and works in \
                 department 1. Your task is to insert a new record for him into the \
                 `EMPLOYEES` table.",
                Difficulty::Beginner,
                "SQL Basics",
                "INSERT INTO EMPLOYEES (Fname, Lname, Ssn, Sex, Salary, Super_ssn, Dno)\nVALUES ('Sir', 'Galahad', '777777777', 'M', 55000, '222222222', 1);",
                "INSERT INTO EMPLOYEES (Fname, Lname, Ssn, Sex, Salary, Super_ssn, Dno) VALUES ('Sir', 'Galahad', '777777777', 'M', 55000, '222222222', 1)",
                "Well done! Sir Galahad has been successfully added to the records.",
                vec![employees_full()],
            ),
            quest(
                "logical-knights",
                "Logic of the Knights",
                "Use AND to combine multiple conditions.",
                "The King needs a specific knight for a dangerous mission. Find all employees \
                 in department 1 (Royal Guard) who earn less than 65,000 gold pieces.",
                Difficulty::Intermediate,
                "SQL Basics",
                "SELECT * FROM EMPLOYEES\nWHERE Dno = 1 AND Salary < 65000;",
                "SELECT * FROM EMPLOYEES WHERE Dno = 1 AND Salary < 65000",
                "You've found the perfect candidate for the mission!",
                vec![table(
                    "EMPLOYEES",
                    &[
                        ("Fname", "VARCHAR(20)"),
                        ("Lname", "VARCHAR(20)"),
                        ("Salary", "INT"),
                        ("Dno", "INT"),
                    ],
                )],
            ),
            quest(
                "update-wizard",
                "UPDATE Wizard",
                "Become a wizard of data modification.",
                "Merlin's exceptional service has earned him a raise! Update his salary in the \
                 `EMPLOYEES` table to 85,000.",
                Difficulty::Intermediate,
                "SQL Basics",
                "UPDATE EMPLOYEES\nSET Salary = 85000\nWHERE Ssn = '555555555';",
                "UPDATE EMPLOYEES SET Salary = 85000 WHERE Ssn = '555555555'",
                "Merlin is pleased! You've successfully updated his salary.",
                vec![table(
                    "EMPLOYEES",
                    &[
                        ("Fname", "VARCHAR(20)"),
                        ("Lname", "VARCHAR(20)"),
                        ("Ssn", "CHAR(9)"),
                        ("Salary", "INT"),
                    ],
                )],
            ),
            quest(
                "order-treasure",
                "The Wealthiest",
                "Sort results using ORDER BY.",
                "The King wants to see his payroll in order. Select all employees and order \
                 them by their `Salary` in descending order (highest salary first).",
                Difficulty::Intermediate,
                "SQL Basics",
                "SELECT * FROM EMPLOYEES\nORDER BY Salary DESC;",
                "SELECT * FROM EMPLOYEES ORDER BY Salary DESC",
                "The list is now perfectly ordered from richest to poorest.",
                vec![table(
                    "EMPLOYEES",
                    &[
                        ("Fname", "VARCHAR(20)"),
                        ("Lname", "VARCHAR(20)"),
                        ("Salary", "INT"),
                    ],
                )],
            ),
            quest(
                "count-staff",
                "The Royal Headcount",
                "Use COUNT to aggregate data.",
                "The King has lost track of how many people work in the castle. Use the COUNT \
                 function to return the total number of rows in the `EMPLOYEES` table.",
                Difficulty::Intermediate,
                "SQL Basics",
                "SELECT COUNT(*) as total_staff FROM EMPLOYEES;",
                "SELECT COUNT(*) as total_staff FROM EMPLOYEES",
                "You've successfully counted the staff!",
                vec![table(
                    "EMPLOYEES",
                    &[("Fname", "VARCHAR(20)"), ("Lname", "VARCHAR(20)")],
                )],
            ),
            quest(
                "join-juggler",
                "The JOIN Juggler",
                "Combine rows from two or more tables.",
                "Let's see the department for each employee. Combine the `EMPLOYEES` and \
                 `DEPARTMENT` tables to show each employee's first and last name along with \
                 their department's name. The tables are linked by `Dno` and `Dnumber`.",
                Difficulty::Advanced,
                "SQL Basics",
                "SELECT e.Fname, e.Lname, d.Dname\nFROM EMPLOYEES e\nJOIN DEPARTMENT d ON e.Dno = d.Dnumber;",
                "SELECT e.Fname, e.Lname, d.Dname FROM EMPLOYEES e JOIN DEPARTMENT d ON e.Dno = d.Dnumber",
                "Fantastic! You've successfully joined the tables and revealed the department \
                 for each employee.",
                vec![
                    table(
                        "EMPLOYEES",
                        &[
                            ("Fname", "VARCHAR(20)"),
                            ("Lname", "VARCHAR(20)"),
                            ("Dno", "INT"),
                        ],
                    ),
                    table(
                        "DEPARTMENT",
                        &[("Dnumber", "INT"), ("Dname", "VARCHAR(50)")],
                    ),
                ],
            ),
            quest(
                "group-by-roles",
                "Department Salary Analysis",
                "Group data and calculate averages.",
                "The King wants to know the average salary for each department in the kingdom. \
                 Use GROUP BY to group the employees by `Dno` and calculate the average \
                 `Salary` for each group.",
                Difficulty::Advanced,
                "SQL Basics",
                "SELECT Dno, AVG(Salary) as avg_salary\nFROM EMPLOYEES\nGROUP BY Dno;",
                "SELECT Dno, AVG(Salary) as avg_salary FROM EMPLOYEES GROUP BY Dno",
                "Insightful! You've successfully analyzed the salary distribution.",
                vec![table("EMPLOYEES", &[("Dno", "INT"), ("Salary", "INT")])],
            ),
            quest(
                "subquery-superstar",
                "Nested Query Quest",
                "Use a subquery to filter data.",
                "The King wants to identify the elite earners. Select the first and last names \
                 of all employees whose salary is greater than the average salary of all \
                 employees. You will need to use a subquery to calculate the average first.",
                Difficulty::Advanced,
                "SQL Advanced",
                "SELECT Fname, Lname FROM EMPLOYEES\nWHERE Salary > (SELECT AVG(Salary) FROM EMPLOYEES);",
                "SELECT Fname, Lname FROM EMPLOYEES WHERE Salary > (SELECT AVG(Salary) FROM EMPLOYEES)",
                "You've successfully identified the top earners using a subquery!",
                vec![table(
                    "EMPLOYEES",
                    &[
                        ("Fname", "VARCHAR(20)"),
                        ("Lname", "VARCHAR(20)"),
                        ("Salary", "INT"),
                    ],
                )],
            ),
            quest(
                "triple-join-projects",
                "Project Personnel Analysis",
                "Join three tables to analyze project contributions.",
                "The board needs a report on project locations. Retrieve the Employee's Last \
                 Name, the Project Name they are working on, and their total Hours, but only \
                 for projects located in 'Houston'.",
                Difficulty::Advanced,
                "Relational Joins",
                "SELECT e.Lname, p.Pname, w.Hours\nFROM EMPLOYEES e\nJOIN WORKS_ON w ON e.Ssn = w.Essn\nJOIN PROJECT p ON w.Pno = p.Pnumber\nWHERE p.Plocation = 'Houston';",
                "SELECT e.Lname, p.Pname, w.Hours FROM EMPLOYEES e JOIN WORKS_ON w ON e.Ssn = w.Essn JOIN PROJECT p ON w.Pno = p.Pnumber WHERE p.Plocation = 'Houston'",
                "Masterful! You successfully traversed a Many-to-Many relationship.",
                vec![
                    table("EMPLOYEES", &[("Lname", "VARCHAR(20)"), ("Ssn", "CHAR(9)")]),
                    table(
                        "PROJECT",
                        &[
                            ("Pname", "VARCHAR(50)"),
                            ("Pnumber", "INT"),
                            ("Plocation", "VARCHAR(50)"),
                        ],
                    ),
                    table(
                        "WORKS_ON",
                        &[("Essn", "CHAR(9)"), ("Pno", "INT"), ("Hours", "DECIMAL(4,1)")],
                    ),
                ],
            ),
            quest(
                "self-join-managers",
                "The Supervisor Search",
                "Use a self-join to identify managers.",
                "Every knight needs a leader. Retrieve the First Name of every employee along \
                 with the First Name of their direct supervisor. Use a self-join on the \
                 EMPLOYEES table.",
                Difficulty::Advanced,
                "Relational Joins",
                "SELECT e.Fname as Employee, s.Fname as Supervisor\nFROM EMPLOYEES e\nJOIN EMPLOYEES s ON e.Super_ssn = s.Ssn;",
                "SELECT e.Fname as Employee, s.Fname as Supervisor FROM EMPLOYEES e JOIN EMPLOYEES s ON e.Super_ssn = s.Ssn",
                "Correct! Self-joins are essential for hierarchical data.",
                vec![table(
                    "EMPLOYEES",
                    &[
                        ("Fname", "VARCHAR(20)"),
                        ("Super_ssn", "CHAR(9)"),
                        ("Ssn", "CHAR(9)"),
                    ],
                )],
            ),
            quest(
                "nested-department-avg",
                "Departmental Elite",
                "Complex subquery with departmental grouping.",
                "Find the names of employees who earn more than the average salary of the \
                 'Research' department (Dnumber 5).",
                Difficulty::Advanced,
                "SQL Advanced",
                "SELECT Fname, Lname FROM EMPLOYEES\nWHERE Salary > (SELECT AVG(Salary) FROM EMPLOYEES WHERE Dno = 5);",
                "SELECT Fname, Lname FROM EMPLOYEES WHERE Salary > (SELECT AVG(Salary) FROM EMPLOYEES WHERE Dno = 5)",
                "Excellent! You've combined aggregation with a filtered subquery.",
                vec![table(
                    "EMPLOYEES",
                    &[
                        ("Fname", "VARCHAR(20)"),
                        ("Lname", "VARCHAR(20)"),
                        ("Salary", "INT"),
                        ("Dno", "INT"),
                    ],
                )],
            ),
        ]
    })
}

pub fn find(id: &str) -> Option<&'static Quest> {
    builtin().iter().find(|q| q.id == id)
}

pub fn categories() -> Vec<&'static str> {
    let mut cats: Vec<&str> = Vec::new();
    for q in builtin() {
        if !cats.contains(&q.category.as_str()) {
            cats.push(q.category.as_str());
        }
    }
    cats
}

// ---------------------------------------------------------------------------
// Themed quest generation

/// Narrative worlds a generated quest can be set in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestTheme {
    MedievalKingdom,
    BachchanVault,
    DesiTraders,
}

struct ThemeContext {
    theme: &'static str,
    schema: &'static str,
    seed_data: &'static str,
}

fn theme_context(theme: QuestTheme) -> ThemeContext {
    match theme {
        QuestTheme::MedievalKingdom => ThemeContext {
            theme: "You are an expert SQL quest designer narrating a medieval fantasy kingdom \
                    set in Camelot. Use language involving kings, knights, royal departments, \
                    arcane councils, and court projects.",
            schema: "TABLE: DEPARTMENT(Dnumber, Dname, Mgr_ssn, Mgr_start_date)\n\
                     TABLE: EMPLOYEES(Fname, Lname, Ssn, Sex, Salary, Super_ssn, Dno)\n\
                     TABLE: PROJECT(Pnumber, Pname, Plocation, Dnum)\n\
                     TABLE: WORKS_ON(Essn, Pno, Hours)",
            seed_data: "DEPARTMENT: (1, 'Royal Guard'), (2, 'Arcane Council'), (5, 'Research')\n\
                        EMPLOYEES: King Arthur, Sir Lancelot, Sir Gawain, Lady Guinevere, \
                        Merlin Ambrosius, Franklin Wong\n\
                        PROJECT: Excalibur Forge (Camelot), Mage Registry (Avalon), \
                        Alchemy Lab (Houston)",
        },
        QuestTheme::BachchanVault => ThemeContext {
            theme: "You are an expert SQL quest designer curating The Bachchan Vault, a \
                    legendary archive centered around Amitabh Bachchan's film career. Use \
                    film-industry language and treat Amitabh Bachchan as the central figure.",
            schema: "TABLE: ACTOR(Act_id, Act_Name, Act_Gender)\n\
                     TABLE: DIRECTOR(Dir_id, Dir_Name, Dir_Phone)\n\
                     TABLE: MOVIES(Mov_id, Mov_Title, Mov_Year, Mov_Lang, Dir_id)\n\
                     TABLE: MOVIE_CAST(Act_id, Mov_id, Role)\n\
                     TABLE: RATING(Mov_id, Rev_Stars)",
            seed_data: "DIRECTOR: Yash Chopra, Ramesh Sippy, Shoojit Sircar\n\
                        ACTOR: Amitabh Bachchan, Shashi Kapoor, Taapsee Pannu\n\
                        MOVIES: Deewaar (1975), Sholay (1975), Pink (2016)",
        },
        QuestTheme::DesiTraders => ThemeContext {
            theme: "You are an expert SQL quest designer narrating a bustling Indian trading \
                    ecosystem. Use practical business language involving salesmen, customers, \
                    cities, and orders.",
            schema: "TABLE: SALESMAN(Salesman_id, Name, City, Commission)\n\
                     TABLE: CUSTOMER(Customer_id, Cust_Name, City, Grade, Salesman_id)\n\
                     TABLE: ORDERS(Ord_No, Purchase_Amt, Ord_Date, Customer_id, Salesman_id)",
            seed_data: "SALESMAN: Ramesh Gupta (Bangalore), Suresh Menon (Mumbai), \
                        Priya Sharma (Delhi)\n\
                        CUSTOMER: Anjali, Rahul, Tina\n\
                        ORDERS: 70001 (15000.00), 70002 (5000.50)",
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerateQuestRequest {
    pub title: String,
    pub short_description: String,
    pub difficulty: Difficulty,
    pub theme: QuestTheme,
}

/// What the text service must produce for a generated quest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuest {
    #[serde(rename = "longDescription")]
    pub long_description: String,
    #[serde(rename = "correctQuery")]
    pub correct_query: String,
}

fn build_generation_prompt(req: &GenerateQuestRequest) -> String {
    let ctx = theme_context(req.theme);
    format!(
        "{theme}\n\nDATABASE SCHEMA:\n{schema}\n\nSEED DATA:\n{seed}\n\nQUEST TITLE:\n{title}\n\n\
         SHORT DESCRIPTION:\n{short}\n\nDIFFICULTY:\n{difficulty}\n\n\
         INSTRUCTIONS: The english needs to be simple and the text needs to be generated in \
         such a way that it can be executed in a single query (no questions with multiple \
         query solutions). Keep the schema in mind. Respond with a JSON object with exactly \
         two string fields: \"longDescription\" and \"correctQuery\".",
        theme = ctx.theme,
        schema = ctx.schema,
        seed = ctx.seed_data,
        title = req.title,
        short = req.short_description,
        difficulty = req.difficulty,
    )
}

/// Pull a JSON object out of model output that may be wrapped in code fences
/// or prose.
fn extract_json(raw: &str) -> &str {
    let s = raw.trim();
    let s = s.strip_prefix("```json").unwrap_or(s);
    let s = s.strip_prefix("```").unwrap_or(s);
    let s = s.strip_suffix("```").unwrap_or(s).trim();
    match (s.find('{'), s.rfind('}')) {
        (Some(start), Some(end)) if start < end => &s[start..=end],
        _ => s,
    }
}

/// Generates themed quests through the text service, caching each result so
/// a quest is produced once per input (generated quests are immutable).
#[derive(Default)]
pub struct QuestGenerator {
    cache: Mutex<HashMap<GenerateQuestRequest, GeneratedQuest>>,
}

impl QuestGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn generate(
        &self,
        model: &dyn TextModel,
        req: &GenerateQuestRequest,
    ) -> Result<GeneratedQuest, ArcadeError> {
        if let Some(hit) = self.cache.lock().get(req) {
            debug!(title = %req.title, "quest generation cache hit");
            return Ok(hit.clone());
        }

        let prompt = build_generation_prompt(req);
        let raw = model.generate(&prompt).await?;
        let parsed: GeneratedQuest = serde_json::from_str(extract_json(&raw)).map_err(|e| {
            ArcadeError::HintService(format!("quest generation returned malformed JSON: {e}"))
        })?;

        let generated = GeneratedQuest {
            long_description: parsed.long_description.trim().to_string(),
            correct_query: parsed.correct_query.trim().to_string(),
        };
        self.cache.lock().insert(req.clone(), generated.clone());
        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for q in builtin() {
            assert!(seen.insert(q.id.as_str()), "duplicate quest id {}", q.id);
        }
    }

    #[test]
    fn catalog_covers_all_difficulties() {
        for d in [
            Difficulty::Beginner,
            Difficulty::Intermediate,
            Difficulty::Advanced,
        ] {
            assert!(builtin().iter().any(|q| q.difficulty == d));
        }
    }

    #[test]
    fn find_resolves_known_ids() {
        assert!(find("where-clause").is_some());
        assert!(find("no-such-quest").is_none());
    }

    #[test]
    fn extract_json_strips_fences_and_prose() {
        let raw = "Here you go:\n```json\n{\"longDescription\":\"d\",\"correctQuery\":\"q\"}\n```";
        let parsed: GeneratedQuest = serde_json::from_str(extract_json(raw)).unwrap();
        assert_eq!(parsed.correct_query, "q");
    }

    #[test]
    fn generation_prompt_embeds_theme_and_schema() {
        let req = GenerateQuestRequest {
            title: "The Vault Opens".into(),
            short_description: "Count the movies.".into(),
            difficulty: Difficulty::Beginner,
            theme: QuestTheme::BachchanVault,
        };
        let prompt = build_generation_prompt(&req);
        assert!(prompt.contains("Bachchan Vault"));
        assert!(prompt.contains("TABLE: MOVIES"));
        assert!(prompt.contains("The Vault Opens"));
    }
}
